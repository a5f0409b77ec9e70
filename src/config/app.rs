use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

/// Runtime configuration, read from the environment (and `.env`)
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Plain HTTP port
    pub http_port: u16,
    /// HTTPS port, used only when the TLS files exist
    pub https_port: u16,
    /// Path to certificate PEM file (cert + CA bundle)
    pub cert_path: PathBuf,
    /// Path to private key PEM file
    pub key_path: PathBuf,
    /// Public base URL, used to build screenshot links
    pub base_url: String,
    /// Directory holding events.json
    pub data_path: String,
    /// Directory holding verifications.json
    pub state_path: String,
    /// Directory screenshots are written to
    pub upload_path: String,
    /// Raw `name:token,name:token` admin list
    pub admin_tokens: String,
    pub ocr: Option<OcrConfig>,
    pub mail: Option<MailConfig>,
    pub adapters: AdapterPolicy,
}

/// OCR HTTP API settings
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub api_url: String,
    pub api_key: String,
}

/// Transactional mail HTTP API settings
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

/// Bounds applied to every call into an external service
#[derive(Debug, Clone, Copy)]
pub struct AdapterPolicy {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for AdapterPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 2,
        }
    }
}

impl AppConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let ocr = match (env_opt("OCR_API_URL"), env_opt("OCR_API_KEY")) {
            (Some(api_url), Some(api_key)) => Some(OcrConfig { api_url, api_key }),
            (None, Some(api_key)) => Some(OcrConfig {
                api_url: "https://api.ocr.space/parse/image".to_string(),
                api_key,
            }),
            _ => {
                warn!("OCR_API_KEY not set, screenshots will not be pre-filled");
                None
            }
        };

        let mail = match (env_opt("MAIL_API_URL"), env_opt("MAIL_API_KEY")) {
            (Some(api_url), Some(api_key)) => Some(MailConfig {
                api_url,
                api_key,
                from: env_or("MAIL_FROM", "Fest Registrations <no-reply@localhost>"),
            }),
            _ => {
                warn!("MAIL_API_URL or MAIL_API_KEY not set, confirmation mails will only be logged");
                None
            }
        };

        Self {
            http_port: env_parse("HTTP_PORT", 3000),
            https_port: env_parse("HTTPS_PORT", 443),
            cert_path: PathBuf::from(env_or("TLS_CERT_PATH", "certs/cert.pem")),
            key_path: PathBuf::from(env_or("TLS_KEY_PATH", "certs/key.pem")),
            base_url: env_or("WEB_BASE_URL", "http://localhost:3000"),
            data_path: env_or("DATA_PATH", "data"),
            state_path: env_or("STATE_PATH", "state"),
            upload_path: env_or("UPLOAD_PATH", "uploads"),
            admin_tokens: env_or("ADMIN_TOKENS", ""),
            ocr,
            mail,
            adapters: AdapterPolicy {
                timeout: Duration::from_secs(env_parse("ADAPTER_TIMEOUT_SECS", 5)),
                retries: env_parse("ADAPTER_RETRIES", 2),
            },
        }
    }

    pub fn events_file(&self) -> String {
        format!("{}/events.json", self.data_path)
    }

    pub fn database_file(&self) -> String {
        format!("{}/verifications.json", self.state_path)
    }

    /// TLS is served only when both PEM files are present
    pub fn tls_enabled(&self) -> bool {
        self.cert_path.exists() && self.key_path.exists()
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env_opt(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid {key} value '{raw}', using default: {default}");
            default
        }),
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}
