use async_trait::async_trait;
use tracing::info;

use crate::config::MailConfig;
use crate::error::{Result, VerifyError};

/// Confirmation sent to a participant after their payment is approved
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationEmail {
    pub to: String,
    pub participant_name: String,
    pub event_names: Vec<String>,
    pub verification_code: String,
    pub transaction_id: String,
    pub whatsapp_link: Option<String>,
}

impl ConfirmationEmail {
    pub fn subject(&self) -> String {
        format!("Registration confirmed - code {}", self.verification_code)
    }

    pub fn html(&self) -> String {
        let events = self
            .event_names
            .iter()
            .map(|e| format!("<li>{}</li>", html_escape(e)))
            .collect::<String>();
        let whatsapp = self
            .whatsapp_link
            .as_ref()
            .map(|link| {
                format!(
                    r#"<p>Join the participants group: <a href="{0}">{0}</a></p>"#,
                    html_escape(link)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<p>Hi {name},</p>
<p>Your payment (transaction <code>{txn}</code>) has been verified and your registration is confirmed for:</p>
<ul>{events}</ul>
<p>Your verification code is <strong>{code}</strong>. Keep it handy for check-in.</p>
{whatsapp}"#,
            name = html_escape(&self.participant_name),
            txn = html_escape(&self.transaction_id),
            events = events,
            code = self.verification_code,
            whatsapp = whatsapp,
        )
    }
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Delivers confirmation mails
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, mail: &ConfirmationEmail) -> Result<()>;
}

/// Sends through a JSON mail API (Resend-style `POST {from, to, subject, html}`)
pub struct HttpNotifier {
    http_client: reqwest::Client,
    config: MailConfig,
}

impl HttpNotifier {
    pub fn new(config: MailConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_confirmation(&self, mail: &ConfirmationEmail) -> Result<()> {
        let payload = serde_json::json!({
            "from": self.config.from,
            "to": [mail.to],
            "subject": mail.subject(),
            "html": mail.html(),
        });

        let response = self
            .http_client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| VerifyError::upstream("mail", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VerifyError::upstream("mail", format!("{}: {}", status, body)));
        }

        info!("Confirmation mail sent to {}", mail.to);
        Ok(())
    }
}

/// Used when no mail API is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_confirmation(&self, mail: &ConfirmationEmail) -> Result<()> {
        info!(
            "Mail delivery not configured; would send '{}' to {}",
            mail.subject(),
            mail.to
        );
        Ok(())
    }
}
