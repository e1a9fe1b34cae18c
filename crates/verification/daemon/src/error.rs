//! Error types for verifyd

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use verification_types::{StorageError, VerificationError};

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// A workflow or policy operation failed
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Malformed request body or query string
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    /// HTTP status and machine-readable code
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        let err = match self {
            ApiError::BadRequest(_) => return (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::Verification(err) => err,
        };

        let status = match err {
            VerificationError::InvalidLevelCount { .. }
            | VerificationError::InvalidSla { .. }
            | VerificationError::ReasonRequired
            | VerificationError::UnknownRole(_)
            | VerificationError::UnknownEntityType(_)
            | VerificationError::InvalidDocumentRef(_)
            | VerificationError::Validation(_) => StatusCode::BAD_REQUEST,

            VerificationError::PolicyNotDraft(_)
            | VerificationError::PolicyNotLocked(_)
            | VerificationError::RequestTerminal(_)
            | VerificationError::StaleLevel { .. }
            | VerificationError::ConcurrentModification(_) => StatusCode::CONFLICT,

            VerificationError::EmptyMultiLevel { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            VerificationError::RoleMismatch { .. } | VerificationError::RejectNotAllowed { .. } => {
                StatusCode::FORBIDDEN
            }

            VerificationError::PolicyNotFound(_)
            | VerificationError::VersionNotFound(_)
            | VerificationError::RequestNotFound(_)
            | VerificationError::NoActiveVersion(_) => StatusCode::NOT_FOUND,

            VerificationError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            VerificationError::InvalidTransition(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, err.kind())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
