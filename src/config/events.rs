use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An event participants can register and pay for
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    /// Unique identifier (e.g., "codeathon-2026")
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Registrations can't be approved after this instant
    pub registration_deadline: DateTime<Utc>,

    /// Group invite shown to participants once verified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp_link: Option<String>,

    /// Registration fee in rupees, for reference on the review screen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<f64>,
}

impl EventConfig {
    pub fn is_closed_at(&self, now: DateTime<Utc>) -> bool {
        now > self.registration_deadline
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// All configured events, keyed by ID
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    events: HashMap<String, EventConfig>,
}

impl EventCatalog {
    pub fn new(events: Vec<EventConfig>) -> Self {
        Self {
            events: events.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    /// Load the catalog from a JSON array of events
    pub fn load_from_file(path: &str) -> crate::error::Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| crate::error::VerifyError::ConfigLoad {
                path: path.to_string(),
                source: e,
            })?;

        let events: Vec<EventConfig> = serde_json::from_str(&content).map_err(|e| {
            crate::error::VerifyError::ConfigParse {
                path: path.to_string(),
                source: e,
            }
        })?;

        Ok(Self::new(events))
    }

    pub fn get(&self, id: &str) -> Option<&EventConfig> {
        self.events.get(id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
