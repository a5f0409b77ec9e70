use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::{Result, VerifyError};

/// Turns a screenshot into raw text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: &[u8], content_type: &str) -> Result<String>;
}

/// Client for an OCR.space-compatible HTTP API
pub struct HttpTextExtractor {
    http_client: reqwest::Client,
    config: OcrConfig,
}

impl HttpTextExtractor {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(default)]
    is_errored_on_processing: bool,
    #[serde(default)]
    error_message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
}

impl OcrResponse {
    fn into_text(self) -> Result<String> {
        if self.is_errored_on_processing {
            let message = match self.error_message {
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
                Some(serde_json::Value::String(s)) => s,
                _ => "processing failed".to_string(),
            };
            return Err(VerifyError::upstream("ocr", message));
        }

        Ok(self
            .parsed_results
            .into_iter()
            .map(|r| r.parsed_text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[async_trait]
impl TextExtractor for HttpTextExtractor {
    async fn extract_text(&self, image: &[u8], content_type: &str) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let data_uri = format!("data:{};base64,{}", content_type, encoded);

        let response = self
            .http_client
            .post(&self.config.api_url)
            .form(&[
                ("apikey", self.config.api_key.as_str()),
                ("base64Image", data_uri.as_str()),
                ("language", "eng"),
                ("OCREngine", "2"),
            ])
            .send()
            .await
            .map_err(|e| VerifyError::upstream("ocr", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VerifyError::upstream("ocr", format!("{}: {}", status, body)));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| VerifyError::upstream("ocr", e))?;

        let text = parsed.into_text()?;
        debug!("OCR returned {} characters", text.len());
        Ok(text)
    }
}

/// Used when no OCR service is configured; admins fill everything in by hand
pub struct NullTextExtractor;

#[async_trait]
impl TextExtractor for NullTextExtractor {
    async fn extract_text(&self, _image: &[u8], _content_type: &str) -> Result<String> {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_response() {
        let json = r#"{
            "ParsedResults": [{"ParsedText": "UPI Ref: 412345678901\r\n", "FileParseExitCode": 1}],
            "OCRExitCode": 1,
            "IsErroredOnProcessing": false
        }"#;

        let response: OcrResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.into_text().unwrap(), "UPI Ref: 412345678901\r\n");
    }

    #[test]
    fn test_parse_error_response() {
        let json = r#"{
            "OCRExitCode": 99,
            "IsErroredOnProcessing": true,
            "ErrorMessage": ["Unable to recognize the file type", "E216"]
        }"#;

        let response: OcrResponse = serde_json::from_str(json).unwrap();
        match response.into_text() {
            Err(VerifyError::Upstream { service, message }) => {
                assert_eq!(service, "ocr");
                assert!(message.contains("file type"));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }
}
