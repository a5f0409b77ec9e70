use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::adapters::{call_with_retry, Adapters, ConfirmationEmail};
use crate::config::{EventCatalog, EventConfig};
use crate::error::{Result, VerifyError};
use crate::extract::extract_fields;
use crate::state::{
    ConfirmedRegistration, Database, PendingVerification, RegistrationData, SharedDatabase,
    VerificationStatus,
};

/// Largest screenshot accepted for upload
pub const MAX_SCREENSHOT_BYTES: usize = 5 * 1024 * 1024;

/// Give up drawing verification codes after this many collisions
const MAX_CODE_ATTEMPTS: usize = 1000;

const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

/// Default page size for the pending list
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Maximum allowed page size
pub const MAX_PAGE_SIZE: u32 = 100;

/// Admin performing a review action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    pub name: String,
}

impl AdminIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A payment screenshot plus the registration it pays for
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub participant_name: String,
    pub event_id: String,
    pub registration_data: RegistrationData,
    pub screenshot: Vec<u8>,
    pub content_type: String,
}

/// Returned to the participant right after upload
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub id: String,
    pub status: VerificationStatus,
    pub transaction_id: Option<String>,
    pub amount: Option<f64>,
    pub upi_id: Option<String>,
}

impl From<&PendingVerification> for SubmitReceipt {
    fn from(record: &PendingVerification) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            transaction_id: record.transaction_id.clone(),
            amount: record.amount,
            upi_id: record.upi_id.clone(),
        }
    }
}

/// Admin corrections applied on approval
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
}

/// What a polling participant sees
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
}

/// Page/limit query for the pending list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageParams {
    /// 1-based page number
    pub fn effective_page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size, clamped to [1, MAX_PAGE_SIZE]
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPage {
    pub items: Vec<PendingVerification>,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub total_pages: usize,
}

/// Runs the payment verification workflow: PENDING -> VERIFIED | REJECTED
pub struct VerificationManager {
    /// Verification records and confirmed registrations
    database: SharedDatabase,

    /// Where the database is persisted (None keeps it in memory)
    database_path: Option<String>,

    /// Event lookups for deadlines and invite links
    events: Arc<EventCatalog>,

    adapters: Adapters,
}

impl VerificationManager {
    pub fn new(
        database: SharedDatabase,
        database_path: Option<String>,
        events: Arc<EventCatalog>,
        adapters: Adapters,
    ) -> Self {
        Self {
            database,
            database_path,
            events,
            adapters,
        }
    }

    /// Get access to the database (for the web server)
    pub fn database(&self) -> &SharedDatabase {
        &self.database
    }

    /// Store a new payment screenshot as a PENDING record.
    ///
    /// Upload and OCR failures are logged and leave the matching fields
    /// empty; only missing input or a failed database write fails the call.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt> {
        let participant_name = request.participant_name.trim().to_string();
        let event_id = request.event_id.trim().to_string();

        if participant_name.is_empty() {
            return Err(VerifyError::validation("participantName is required"));
        }
        if event_id.is_empty() {
            return Err(VerifyError::validation("eventId is required"));
        }
        if request.screenshot.is_empty() {
            return Err(VerifyError::validation("A payment screenshot is required"));
        }
        if request.screenshot.len() > MAX_SCREENSHOT_BYTES {
            return Err(VerifyError::PayloadTooLarge {
                message: format!("screenshot is larger than {} bytes", MAX_SCREENSHOT_BYTES),
            });
        }
        if !request.content_type.starts_with("image/") {
            return Err(VerifyError::validation(format!(
                "Screenshot must be an image, got '{}'",
                request.content_type
            )));
        }
        if self.events.get(&event_id).is_none() {
            return Err(VerifyError::NotFound {
                entity: "Event",
                id: event_id,
            });
        }

        let mut record =
            PendingVerification::new(participant_name, event_id, request.registration_data);

        let policy = self.adapters.policy;
        let blob_store = &self.adapters.blob_store;
        let text_extractor = &self.adapters.text_extractor;
        let bytes = request.screenshot.as_slice();
        let content_type = request.content_type.as_str();

        let (upload, text) = tokio::join!(
            call_with_retry("blob store", policy, move || blob_store.upload(bytes, content_type)),
            call_with_retry("ocr", policy, move || text_extractor.extract_text(bytes, content_type)),
        );

        match upload {
            Ok(blob) => {
                record.screenshot_url = Some(blob.url);
                record.screenshot_storage_path = Some(blob.storage_id);
            }
            Err(e) => warn!(
                record_id = %record.id,
                "Screenshot upload failed, keeping record without it: {}", e
            ),
        }

        match text {
            Ok(text) => {
                let fields = extract_fields(&text);
                if fields.is_empty() {
                    debug!(record_id = %record.id, "No payment fields recognised in screenshot");
                }
                record.transaction_id = fields.transaction_id;
                record.amount = fields.amount;
                record.upi_id = fields.upi_id;
                if !fields.raw_text.trim().is_empty() {
                    record.raw_text = Some(fields.raw_text);
                }
            }
            Err(e) => warn!(
                record_id = %record.id,
                "OCR failed, record left for manual entry: {}", e
            ),
        }

        {
            let mut db = self.database.write().await;
            db.insert_verification(record.clone());

            if let Err(e) = self.persist(&db).await {
                db.remove_verification(&record.id);
                drop(db);
                self.discard_screenshot(&record).await;
                return Err(e);
            }
        }

        info!(
            record_id = %record.id,
            "Payment screenshot submitted by '{}' for event {}",
            record.participant_name, record.event_id
        );

        Ok(SubmitReceipt::from(&record))
    }

    /// Approve a PENDING record and materialize its registration.
    ///
    /// The status flip and the registration insert are committed together;
    /// if either fails the record stays PENDING.
    pub async fn approve(
        &self,
        id: &str,
        request: ApproveRequest,
        admin: &AdminIdentity,
    ) -> Result<ConfirmedRegistration> {
        let (registration, record, events) = {
            let mut db = self.database.write().await;

            let mut updated = db.require_pending(id)?.clone();
            if let Some(amount) = request.amount {
                if !amount.is_finite() || amount < 0.0 {
                    return Err(VerifyError::validation("amount must be a non-negative number"));
                }
            }
            updated.apply_overrides(request.transaction_id, request.amount);

            let transaction_id = updated.transaction_id.clone().ok_or_else(|| {
                VerifyError::validation("A transaction ID is required to approve this payment")
            })?;

            let events = self.open_events(&updated, Utc::now())?;
            let code = generate_verification_code(&db)?;
            let registration =
                ConfirmedRegistration::from_pending(&updated, transaction_id, code, &admin.name);

            let previous = db.confirm(updated, registration.clone(), &admin.name)?;

            if let Err(e) = self.persist(&db).await {
                db.rollback_confirm(previous, &registration.id);
                error!(record_id = %id, "Approval rolled back, could not persist: {}", e);
                return Err(e);
            }

            let record = db.get_verification(id).cloned().ok_or_else(|| VerifyError::Internal {
                message: format!("Verification {} vanished after approval", id),
            })?;

            (registration, record, events)
        };

        info!(
            record_id = %id,
            "Payment verified by {} (transaction {}, code {})",
            admin.name, registration.transaction_id, registration.verification_code
        );

        self.spawn_confirmation_mail(&record, &registration, &events);

        Ok(registration)
    }

    /// Reject a PENDING record. No registration is created.
    pub async fn reject(&self, id: &str, admin: &AdminIdentity) -> Result<PendingVerification> {
        let mut db = self.database.write().await;

        let previous = db.reject(id, &admin.name)?;
        if let Err(e) = self.persist(&db).await {
            db.restore_verification(previous);
            error!(record_id = %id, "Rejection rolled back, could not persist: {}", e);
            return Err(e);
        }

        let record = db.get_verification(id).cloned().ok_or_else(|| VerifyError::Internal {
            message: format!("Verification {} vanished after rejection", id),
        })?;

        info!(record_id = %id, "Payment rejected by {}", admin.name);
        Ok(record)
    }

    /// Current status of a submission, for the participant's poller
    pub async fn poll_status(&self, id: &str) -> Result<StatusView> {
        let db = self.database.read().await;
        let record = db.get_verification(id).ok_or_else(|| VerifyError::NotFound {
            entity: "Verification",
            id: id.to_string(),
        })?;

        if record.status != VerificationStatus::Verified {
            return Ok(StatusView {
                status: record.status,
                whatsapp_link: None,
                verification_code: None,
            });
        }

        let whatsapp_link = record
            .referenced_events()
            .iter()
            .filter_map(|event_id| self.events.get(event_id))
            .find_map(|event| event.whatsapp_link.clone());

        Ok(StatusView {
            status: record.status,
            whatsapp_link,
            verification_code: db
                .find_registration_by_pending(id)
                .map(|r| r.verification_code.clone()),
        })
    }

    /// PENDING records for the admin review queue, oldest first
    pub async fn list_pending(&self, params: &PageParams) -> PendingPage {
        let page = params.effective_page();
        let limit = params.effective_limit();
        let offset = (page as usize - 1) * limit as usize;

        let db = self.database.read().await;
        let (items, total) = db.pending_page(offset, limit as usize);

        PendingPage {
            items,
            page,
            limit,
            total,
            total_pages: total.div_ceil(limit as usize),
        }
    }

    /// Full record for admin review
    pub async fn get_record(&self, id: &str) -> Result<PendingVerification> {
        let db = self.database.read().await;
        db.get_verification(id).cloned().ok_or_else(|| VerifyError::NotFound {
            entity: "Verification",
            id: id.to_string(),
        })
    }

    /// Every referenced event must exist and still accept registrations
    fn open_events(
        &self,
        record: &PendingVerification,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventConfig>> {
        record
            .referenced_events()
            .into_iter()
            .map(|event_id| -> Result<EventConfig> {
                let event = self.events.get(&event_id).ok_or_else(|| VerifyError::NotFound {
                    entity: "Event",
                    id: event_id.clone(),
                })?;
                if event.is_closed_at(now) {
                    return Err(VerifyError::RegistrationClosed {
                        event_id,
                        deadline: event.registration_deadline.to_rfc3339(),
                    });
                }
                Ok(event.clone())
            })
            .collect()
    }

    fn spawn_confirmation_mail(
        &self,
        record: &PendingVerification,
        registration: &ConfirmedRegistration,
        events: &[EventConfig],
    ) {
        let Some(to) = record.registration_data().recipient_email() else {
            warn!(record_id = %record.id, "No email address on registration, skipping confirmation mail");
            return;
        };

        let mail = ConfirmationEmail {
            to: to.to_string(),
            participant_name: record.participant_name.clone(),
            event_names: events.iter().map(|e| e.display_name().to_string()).collect(),
            verification_code: registration.verification_code.clone(),
            transaction_id: registration.transaction_id.clone(),
            whatsapp_link: events.iter().find_map(|e| e.whatsapp_link.clone()),
        };

        let notifier = self.adapters.notifier.clone();
        let policy = self.adapters.policy;
        let record_id = record.id.clone();

        tokio::spawn(async move {
            let result = call_with_retry("mail", policy, || notifier.send_confirmation(&mail)).await;
            if let Err(e) = result {
                error!(record_id = %record_id, "Confirmation mail to {} failed: {}", mail.to, e);
            }
        });
    }

    async fn discard_screenshot(&self, record: &PendingVerification) {
        if let Some(storage_id) = &record.screenshot_storage_path {
            if let Err(e) = self.adapters.blob_store.delete(storage_id).await {
                warn!(record_id = %record.id, "Failed to delete orphaned screenshot {}: {}", storage_id, e);
            }
        }
    }

    async fn persist(&self, db: &Database) -> Result<()> {
        match &self.database_path {
            Some(path) => db.save(path).await,
            None => Ok(()),
        }
    }
}

/// Draw random 6-digit codes until one is unused
fn generate_verification_code(db: &Database) -> Result<String> {
    let mut rng = rand::thread_rng();
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = rng.gen_range(CODE_MIN..=CODE_MAX).to_string();
        if !db.code_in_use(&code) {
            return Ok(code);
        }
    }

    Err(VerifyError::Internal {
        message: format!(
            "No free verification code after {} attempts",
            MAX_CODE_ATTEMPTS
        ),
    })
}

/// Shared verification manager type
pub type SharedVerificationManager = Arc<VerificationManager>;

pub fn create_shared_verification_manager(
    database: SharedDatabase,
    database_path: Option<String>,
    events: Arc<EventCatalog>,
    adapters: Adapters,
) -> SharedVerificationManager {
    Arc::new(VerificationManager::new(
        database,
        database_path,
        events,
        adapters,
    ))
}
