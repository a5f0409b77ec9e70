use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::records::{ConfirmedRegistration, PendingVerification, VerificationStatus};
use crate::error::{Result, VerifyError};

const SCHEMA_VERSION: u32 = 1;

/// Pending verifications and the registrations confirmed from them.
///
/// Both collections live in one document so an approval (status flip plus
/// registration insert) is a single write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// Schema version for migrations
    pub version: u32,

    /// Last update timestamp
    pub last_updated: u64,

    /// Pending verification ID -> record
    pub verifications: HashMap<String, PendingVerification>,

    /// Registration ID -> confirmed registration
    pub registrations: HashMap<String, ConfirmedRegistration>,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            last_updated: current_timestamp(),
            verifications: HashMap::new(),
            registrations: HashMap::new(),
        }
    }
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file, or create new if not exists
    pub async fn load(path: &str) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let db: Self =
                    serde_json::from_str(&content).map_err(|e| VerifyError::StateParse {
                        path: path.to_string(),
                        source: e,
                    })?;
                tracing::info!(
                    "Loaded {} verifications and {} registrations from {}",
                    db.verifications.len(),
                    db.registration_count(),
                    path
                );
                Ok(db)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(VerifyError::StateLoad {
                path: path.to_string(),
                source: e,
            }),
        }
    }

    /// Save to a JSON file atomically
    pub async fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = format!("{}.tmp", path);
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| VerifyError::StateSave {
                path: path.to_string(),
                source: e,
            })?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| VerifyError::StateSave {
                path: path.to_string(),
                source: e,
            })?;

        Ok(())
    }

    pub fn get_verification(&self, id: &str) -> Option<&PendingVerification> {
        self.verifications.get(id)
    }

    pub fn insert_verification(&mut self, record: PendingVerification) {
        self.verifications.insert(record.id.clone(), record);
        self.touch();
    }

    pub fn remove_verification(&mut self, id: &str) -> Option<PendingVerification> {
        let removed = self.verifications.remove(id);
        self.touch();
        removed
    }

    /// Put back a record exactly as it was before a failed write
    pub fn restore_verification(&mut self, record: PendingVerification) {
        self.verifications.insert(record.id.clone(), record);
    }

    /// PENDING records, oldest first, with the total count
    pub fn pending_page(&self, offset: usize, limit: usize) -> (Vec<PendingVerification>, usize) {
        let mut pending: Vec<&PendingVerification> = self
            .verifications
            .values()
            .filter(|r| r.status == VerificationStatus::Pending)
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let total = pending.len();
        let page = pending.into_iter().skip(offset).take(limit).cloned().collect();
        (page, total)
    }

    pub fn find_registration_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Option<&ConfirmedRegistration> {
        self.registrations
            .values()
            .find(|r| r.transaction_id.eq_ignore_ascii_case(transaction_id))
    }

    pub fn find_registration_by_pending(&self, pending_id: &str) -> Option<&ConfirmedRegistration> {
        self.registrations.values().find(|r| r.pending_id == pending_id)
    }

    pub fn code_in_use(&self, code: &str) -> bool {
        self.registrations.values().any(|r| r.verification_code == code)
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// Ensure a record exists and is still PENDING
    pub fn require_pending(&self, id: &str) -> Result<&PendingVerification> {
        let record = self.verifications.get(id).ok_or_else(|| VerifyError::NotFound {
            entity: "Verification",
            id: id.to_string(),
        })?;

        if record.status.is_terminal() {
            return Err(VerifyError::InvalidState {
                id: id.to_string(),
                status: record.status.to_string(),
            });
        }

        Ok(record)
    }

    /// PENDING -> REJECTED. Returns the record as it was before the change.
    pub fn reject(&mut self, id: &str, reviewer: &str) -> Result<PendingVerification> {
        let previous = self.require_pending(id)?.clone();

        if let Some(record) = self.verifications.get_mut(id) {
            record.mark_reviewed(VerificationStatus::Rejected, reviewer);
        }
        self.touch();

        Ok(previous)
    }

    /// PENDING -> VERIFIED together with the registration insert.
    ///
    /// `updated` is the record with admin overrides applied. Returns the
    /// stored record as it was before the change so the caller can undo it.
    pub fn confirm(
        &mut self,
        mut updated: PendingVerification,
        registration: ConfirmedRegistration,
        reviewer: &str,
    ) -> Result<PendingVerification> {
        let previous = self.require_pending(&updated.id)?.clone();

        if let Some(existing) = self.find_registration_by_transaction(&registration.transaction_id) {
            return Err(VerifyError::DuplicateTransaction {
                transaction_id: registration.transaction_id.clone(),
                registration_id: existing.id.clone(),
            });
        }
        if self.code_in_use(&registration.verification_code) {
            return Err(VerifyError::Internal {
                message: format!(
                    "Verification code {} is already assigned",
                    registration.verification_code
                ),
            });
        }

        updated.mark_reviewed(VerificationStatus::Verified, reviewer);
        self.verifications.insert(updated.id.clone(), updated);
        self.registrations.insert(registration.id.clone(), registration);
        self.touch();

        Ok(previous)
    }

    /// Undo a `confirm` whose persistence failed
    pub fn rollback_confirm(&mut self, previous: PendingVerification, registration_id: &str) {
        self.registrations.remove(registration_id);
        self.restore_verification(previous);
    }

    fn touch(&mut self) {
        self.last_updated = current_timestamp();
    }
}

/// Shared database type
pub type SharedDatabase = Arc<tokio::sync::RwLock<Database>>;

pub fn create_shared_database(db: Database) -> SharedDatabase {
    Arc::new(tokio::sync::RwLock::new(db))
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(event: &str) -> PendingVerification {
        PendingVerification::new("Asha".to_string(), event.to_string(), Default::default())
    }

    fn registration_for(record: &PendingVerification, txn: &str, code: &str) -> ConfirmedRegistration {
        ConfirmedRegistration::from_pending(record, txn.to_string(), code.to_string(), "admin")
    }

    #[test]
    fn test_confirm_flips_status_and_inserts_registration() {
        let mut db = Database::new();
        let record = pending("fest");
        let id = record.id.clone();
        db.insert_verification(record.clone());

        let reg = registration_for(&record, "412345678901", "123456");
        db.confirm(record, reg, "admin").unwrap();

        let stored = db.get_verification(&id).unwrap();
        assert_eq!(stored.status, VerificationStatus::Verified);
        assert_eq!(stored.reviewed_by.as_deref(), Some("admin"));
        assert_eq!(db.registration_count(), 1);
        assert!(db.code_in_use("123456"));
        assert!(db.find_registration_by_pending(&id).is_some());
    }

    #[test]
    fn test_second_transition_is_invalid_state() {
        let mut db = Database::new();
        let record = pending("fest");
        let id = record.id.clone();
        db.insert_verification(record.clone());

        db.reject(&id, "admin").unwrap();
        let err = db.reject(&id, "admin").unwrap_err();
        assert!(matches!(err, VerifyError::InvalidState { .. }));

        let reg = registration_for(&record, "412345678901", "123456");
        let err = db.confirm(record, reg, "admin").unwrap_err();
        assert!(matches!(err, VerifyError::InvalidState { .. }));
        assert_eq!(db.get_verification(&id).unwrap().status, VerificationStatus::Rejected);
        assert_eq!(db.registration_count(), 0);
    }

    #[test]
    fn test_duplicate_transaction_leaves_record_pending() {
        let mut db = Database::new();
        let first = pending("fest");
        let second = pending("fest");
        db.insert_verification(first.clone());
        db.insert_verification(second.clone());

        db.confirm(first.clone(), registration_for(&first, "ABC123456789", "111111"), "admin")
            .unwrap();
        let err = db
            .confirm(second.clone(), registration_for(&second, "abc123456789", "222222"), "admin")
            .unwrap_err();

        assert!(matches!(err, VerifyError::DuplicateTransaction { .. }));
        assert_eq!(
            db.get_verification(&second.id).unwrap().status,
            VerificationStatus::Pending
        );
        assert_eq!(db.registration_count(), 1);
    }

    #[test]
    fn test_rollback_confirm_restores_pending() {
        let mut db = Database::new();
        let record = pending("fest");
        db.insert_verification(record.clone());

        let reg = registration_for(&record, "412345678901", "123456");
        let reg_id = reg.id.clone();
        let previous = db.confirm(record.clone(), reg, "admin").unwrap();
        db.rollback_confirm(previous, &reg_id);

        assert_eq!(db.get_verification(&record.id), Some(&record));
        assert_eq!(db.registration_count(), 0);
    }

    #[test]
    fn test_pending_page_skips_terminal_records() {
        let mut db = Database::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let record = pending("fest");
            ids.push(record.id.clone());
            db.insert_verification(record);
        }
        db.reject(&ids[0], "admin").unwrap();

        let (page, total) = db.pending_page(0, 3);
        assert_eq!(total, 4);
        assert_eq!(page.len(), 3);
        assert!(page.iter().all(|r| r.status == VerificationStatus::Pending));

        let (rest, _) = db.pending_page(3, 3);
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("fest-verify-db-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("verifications.json");
        let path = path.to_str().unwrap();

        let mut db = Database::new();
        db.insert_verification(pending("fest"));
        db.save(path).await.unwrap();

        let loaded = Database::load(path).await.unwrap();
        assert_eq!(loaded.verifications.len(), 1);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_load_corrupt_file_reports_state_error() {
        let dir = std::env::temp_dir().join(format!("fest-verify-db-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("verifications.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = Database::load(path.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, VerifyError::StateParse { .. }));
        assert!(err.to_string().starts_with("Verification database"));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let db = Database::load("/nonexistent/fest-verify/verifications.json")
            .await
            .unwrap();
        assert!(db.verifications.is_empty());
    }
}
