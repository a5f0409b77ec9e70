use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    // Configuration errors
    #[error("Failed to load config file '{path}': {source}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    // State errors
    #[error("Failed to save state to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load state from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Verification database '{path}' is corrupt: {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    // Request errors
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // Workflow errors
    #[error("Verification {id} is already {status}")]
    InvalidState { id: String, status: String },

    #[error("Registration for event '{event_id}' closed at {deadline}")]
    RegistrationClosed { event_id: String, deadline: String },

    #[error("Transaction ID '{transaction_id}' is already used by registration {registration_id}")]
    DuplicateTransaction {
        transaction_id: String,
        registration_id: String,
    },

    // Auth errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Upstream service errors (blob store, OCR, mail)
    #[error("{service} error: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl VerifyError {
    pub fn validation(message: impl Into<String>) -> Self {
        VerifyError::Validation {
            message: message.into(),
        }
    }

    pub fn upstream(service: &'static str, message: impl ToString) -> Self {
        VerifyError::Upstream {
            service,
            message: message.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            VerifyError::Validation { .. } | VerifyError::RegistrationClosed { .. } => {
                StatusCode::BAD_REQUEST
            }
            VerifyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            VerifyError::NotFound { .. } => StatusCode::NOT_FOUND,
            VerifyError::InvalidState { .. } | VerifyError::DuplicateTransaction { .. } => {
                StatusCode::CONFLICT
            }
            VerifyError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            VerifyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            VerifyError::ConfigLoad { .. }
            | VerifyError::ConfigParse { .. }
            | VerifyError::StateSave { .. }
            | VerifyError::StateLoad { .. }
            | VerifyError::StateParse { .. }
            | VerifyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for VerifyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<std::io::Error> for VerifyError {
    fn from(err: std::io::Error) -> Self {
        VerifyError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for VerifyError {
    fn from(err: serde_json::Error) -> Self {
        VerifyError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
