//! In-process log capture for the admin API.
//!
//! A tracing layer copies every event into a bounded ring buffer and a
//! broadcast channel. Adapter failures (OCR, mail, blob store) are logged
//! with a `record_id` field, so admins can see which submission degraded.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A single captured log entry
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

impl LogEntry {
    /// Format as JSON for SSE
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

/// Buffer that stores recent log entries and broadcasts new ones
pub struct LogBuffer {
    tx: broadcast::Sender<LogEntry>,
    recent: parking_lot::RwLock<VecDeque<LogEntry>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            recent: parking_lot::RwLock::new(VecDeque::with_capacity(max_entries)),
            max_entries,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        {
            let mut recent = self.recent.write();
            if recent.len() >= self.max_entries {
                recent.pop_front();
            }
            recent.push_back(entry.clone());
        }

        // No receivers is fine
        let _ = self.tx.send(entry);
    }

    /// Most recent `count` entries, oldest first
    pub fn get_recent(&self, count: usize) -> Vec<LogEntry> {
        let recent = self.recent.read();
        let start = recent.len().saturating_sub(count);
        recent.iter().skip(start).cloned().collect()
    }

    /// Entries mentioning a given verification record
    pub fn for_record(&self, record_id: &str) -> Vec<LogEntry> {
        self.recent
            .read()
            .iter()
            .filter(|e| e.record_id.as_deref() == Some(record_id))
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}

/// Shared log buffer type
pub type SharedLogBuffer = Arc<LogBuffer>;

pub fn create_log_buffer(max_entries: usize) -> SharedLogBuffer {
    Arc::new(LogBuffer::new(max_entries))
}

/// Tracing layer that captures logs to the buffer
pub struct LogCaptureLayer {
    buffer: SharedLogBuffer,
}

impl LogCaptureLayer {
    pub fn new(buffer: SharedLogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S> Layer<S> for LogCaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EntryVisitor::default();
        event.record(&mut visitor);

        self.buffer.push(LogEntry {
            timestamp: chrono::Utc::now(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            record_id: visitor.record_id,
        });
    }
}

#[derive(Default)]
struct EntryVisitor {
    message: String,
    record_id: Option<String>,
}

impl tracing::field::Visit for EntryVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            // `%id` arrives here as a Display wrapper; its Debug prints the bare id
            "record_id" => self.record_id = Some(format!("{:?}", value)),
            _ => {}
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "record_id" => self.record_id = Some(value.to_string()),
            _ => {}
        }
    }
}
