use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of a submitted payment screenshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationStatus::Pending)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationStatus::Pending => "PENDING",
            VerificationStatus::Verified => "VERIFIED",
            VerificationStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// College a team is registering from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollegeInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// One participant in a team
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamMember {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Registration form captured at upload time and replayed on approval.
///
/// Only the fields the workflow reads are typed; anything else the front end
/// sends is kept in `extra` untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub college: Option<CollegeInfo>,

    #[serde(default)]
    pub members: Vec<TeamMember>,

    /// Selected sub-event IDs
    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RegistrationData {
    /// Address the confirmation mail goes to
    pub fn recipient_email(&self) -> Option<&str> {
        self.contact_email
            .as_deref()
            .or_else(|| self.members.iter().find_map(|m| m.email.as_deref()))
            .filter(|e| !e.trim().is_empty())
    }
}

/// A submitted payment screenshot awaiting admin review
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingVerification {
    pub id: String,
    pub participant_name: String,
    pub event_id: String,

    /// Public URL of the screenshot (absent if the upload failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<String>,

    /// Blob store identifier of the screenshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_storage_path: Option<String>,

    pub transaction_id: Option<String>,
    pub amount: Option<f64>,
    pub upi_id: Option<String>,

    /// OCR output, kept for manual entry when extraction misses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,

    pub status: VerificationStatus,

    registration_data: RegistrationData,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingVerification {
    pub fn new(
        participant_name: String,
        event_id: String,
        registration_data: RegistrationData,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            participant_name,
            event_id,
            screenshot_url: None,
            screenshot_storage_path: None,
            transaction_id: None,
            amount: None,
            upi_id: None,
            raw_text: None,
            status: VerificationStatus::Pending,
            registration_data,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Registration form as submitted. Read-only after creation.
    pub fn registration_data(&self) -> &RegistrationData {
        &self.registration_data
    }

    /// Primary event followed by selected sub-events, without duplicates
    pub fn referenced_events(&self) -> Vec<String> {
        let mut ids = vec![self.event_id.clone()];
        for id in &self.registration_data.events {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Apply admin corrections before approval
    pub fn apply_overrides(&mut self, transaction_id: Option<String>, amount: Option<f64>) {
        if let Some(txn) = transaction_id.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            self.transaction_id = Some(txn);
        }
        if let Some(amount) = amount {
            self.amount = Some(amount);
        }
        self.updated_at = Utc::now();
    }

    pub(super) fn mark_reviewed(&mut self, status: VerificationStatus, reviewer: &str) {
        let now = Utc::now();
        self.status = status;
        self.reviewed_by = Some(reviewer.to_string());
        self.reviewed_at = Some(now);
        self.updated_at = now;
    }
}

/// Durable registration created once a payment is approved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedRegistration {
    pub id: String,
    pub pending_id: String,
    pub event_ids: Vec<String>,
    pub participant_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub college: Option<CollegeInfo>,
    pub members: Vec<TeamMember>,
    pub transaction_id: String,
    pub amount: Option<f64>,
    pub verification_code: String,
    pub verified: bool,
    pub verified_by: String,
    pub created_at: DateTime<Utc>,
}

impl ConfirmedRegistration {
    /// Materialize a registration from a pending record.
    /// The caller guarantees the record carries a transaction ID.
    pub fn from_pending(
        pending: &PendingVerification,
        transaction_id: String,
        verification_code: String,
        verified_by: &str,
    ) -> Self {
        let data = pending.registration_data();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pending_id: pending.id.clone(),
            event_ids: pending.referenced_events(),
            participant_name: pending.participant_name.clone(),
            team_name: data.team_name.clone(),
            college: data.college.clone(),
            members: data.members.clone(),
            transaction_id,
            amount: pending.amount,
            verification_code,
            verified: true,
            verified_by: verified_by.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_data_keeps_unknown_fields() {
        let json = r#"{
            "teamName": "Null Pointers",
            "college": {"name": "GEC", "city": "Thrissur"},
            "members": [{"name": "Asha", "email": "asha@example.com"}],
            "events": ["codeathon", "quiz"],
            "accommodation": true
        }"#;

        let data: RegistrationData = serde_json::from_str(json).unwrap();
        assert_eq!(data.team_name.as_deref(), Some("Null Pointers"));
        assert_eq!(data.events.len(), 2);
        assert_eq!(data.extra.get("accommodation"), Some(&serde_json::json!(true)));
        assert_eq!(data.recipient_email(), Some("asha@example.com"));

        let back = serde_json::to_value(&data).unwrap();
        assert_eq!(back["accommodation"], serde_json::json!(true));
    }

    #[test]
    fn test_referenced_events_deduplicated() {
        let data = RegistrationData {
            events: vec!["quiz".to_string(), "fest".to_string(), "quiz".to_string()],
            ..Default::default()
        };
        let record = PendingVerification::new("Asha".to_string(), "fest".to_string(), data);

        assert_eq!(record.referenced_events(), vec!["fest", "quiz"]);
    }

    #[test]
    fn test_overrides_ignore_blank_transaction_id() {
        let mut record =
            PendingVerification::new("Asha".to_string(), "fest".to_string(), Default::default());
        record.transaction_id = Some("412345678901".to_string());

        record.apply_overrides(Some("   ".to_string()), Some(300.0));
        assert_eq!(record.transaction_id.as_deref(), Some("412345678901"));
        assert_eq!(record.amount, Some(300.0));
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&VerificationStatus::Verified).unwrap(),
            "\"VERIFIED\""
        );
        assert!(VerificationStatus::Rejected.is_terminal());
        assert!(!VerificationStatus::Pending.is_terminal());
    }
}
