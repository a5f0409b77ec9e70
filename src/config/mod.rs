pub mod app;
pub mod events;

pub use app::{AdapterPolicy, AppConfig, MailConfig, OcrConfig};
pub use events::{EventCatalog, EventConfig};
