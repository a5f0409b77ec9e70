//! Clients for the external services the workflow leans on: screenshot
//! storage, OCR and mail delivery.

pub mod blob;
pub mod mail;
pub mod ocr;
pub mod retry;

pub use blob::{BlobStore, LocalBlobStore};
pub use mail::{ConfirmationEmail, HttpNotifier, LogNotifier, Notifier};
pub use ocr::{HttpTextExtractor, NullTextExtractor, TextExtractor};
pub use retry::call_with_retry;

use std::sync::Arc;
use tracing::info;

use crate::config::{AdapterPolicy, AppConfig};

/// The set of external services handed to the verification manager
#[derive(Clone)]
pub struct Adapters {
    pub blob_store: Arc<dyn BlobStore>,
    pub text_extractor: Arc<dyn TextExtractor>,
    pub notifier: Arc<dyn Notifier>,
    pub policy: AdapterPolicy,
}

impl Adapters {
    pub fn from_config(config: &AppConfig) -> Self {
        let text_extractor: Arc<dyn TextExtractor> = match &config.ocr {
            Some(ocr) => {
                info!("OCR enabled via {}", ocr.api_url);
                Arc::new(HttpTextExtractor::new(ocr.clone()))
            }
            None => Arc::new(NullTextExtractor),
        };

        let notifier: Arc<dyn Notifier> = match &config.mail {
            Some(mail) => {
                info!("Confirmation mails enabled via {}", mail.api_url);
                Arc::new(HttpNotifier::new(mail.clone()))
            }
            None => Arc::new(LogNotifier),
        };

        Self {
            blob_store: Arc::new(LocalBlobStore::new(&config.upload_path, &config.base_url)),
            text_extractor,
            notifier,
            policy: config.adapters,
        }
    }
}
