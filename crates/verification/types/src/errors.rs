//! Error types for verification policies and workflows

use crate::{PolicyId, PolicyKey, RequestId, Role, VerificationMode, VersionRef};

/// Errors raised by a storage backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be reached or failed mid-operation
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A write lost an optimistic revision check or hit a duplicate key
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors that can occur in policy and workflow operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerificationError {
    // ── Policy shape ─────────────────────────────────────────────────
    #[error("Mode {mode} needs {min}..={max} levels, got {actual}")]
    InvalidLevelCount {
        mode: VerificationMode,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Level {level_index} must have slaHours between 1 and {max}", max = crate::MAX_SLA_HOURS)]
    InvalidSla { level_index: usize },

    #[error("Multi-level policy {policy_id} has only {actual} level(s)")]
    EmptyMultiLevel { policy_id: PolicyId, actual: usize },

    // ── Policy lifecycle ─────────────────────────────────────────────
    #[error("Policy {0} is not a draft")]
    PolicyNotDraft(PolicyId),

    #[error("Policy {0} is not locked")]
    PolicyNotLocked(PolicyId),

    #[error("A non-blank reason is required")]
    ReasonRequired,

    // ── Decisions ────────────────────────────────────────────────────
    #[error("Request {0} is already finished")]
    RequestTerminal(RequestId),

    #[error("Level requires role {expected}, actor holds {actual}")]
    RoleMismatch { expected: Role, actual: Role },

    #[error("Level {level_index} does not allow rejection")]
    RejectNotAllowed { level_index: usize },

    #[error("Decision targets level {requested}, request is at level {current}")]
    StaleLevel { requested: usize, current: usize },

    // ── Lookups ──────────────────────────────────────────────────────
    #[error("Policy not found: {0}")]
    PolicyNotFound(PolicyId),

    #[error("Policy version not found: {0}")]
    VersionNotFound(VersionRef),

    #[error("Verification request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("No active policy version for {0}")]
    NoActiveVersion(PolicyKey),

    // ── Input ────────────────────────────────────────────────────────
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Invalid document reference: {0} (expected owner/slot)")]
    InvalidDocumentRef(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ── Internal / infrastructure ────────────────────────────────────
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(StorageError),
}

impl VerificationError {
    /// Stable machine-readable code for API consumers
    pub fn kind(&self) -> &'static str {
        match self {
            VerificationError::InvalidLevelCount { .. } => "InvalidLevelCount",
            VerificationError::InvalidSla { .. } => "InvalidSla",
            VerificationError::EmptyMultiLevel { .. } => "EmptyMultiLevel",
            VerificationError::PolicyNotDraft(_) => "PolicyNotDraft",
            VerificationError::PolicyNotLocked(_) => "PolicyNotLocked",
            VerificationError::ReasonRequired => "ReasonRequired",
            VerificationError::RequestTerminal(_) => "RequestTerminal",
            VerificationError::RoleMismatch { .. } => "RoleMismatch",
            VerificationError::RejectNotAllowed { .. } => "RejectNotAllowed",
            VerificationError::StaleLevel { .. } => "StaleLevel",
            VerificationError::PolicyNotFound(_) => "PolicyNotFound",
            VerificationError::VersionNotFound(_) => "VersionNotFound",
            VerificationError::RequestNotFound(_) => "RequestNotFound",
            VerificationError::NoActiveVersion(_) => "NoActiveVersion",
            VerificationError::UnknownRole(_) => "UnknownRole",
            VerificationError::UnknownEntityType(_) => "UnknownEntityType",
            VerificationError::InvalidDocumentRef(_) => "InvalidDocumentRef",
            VerificationError::Validation(_) => "ValidationError",
            VerificationError::InvalidTransition(_) => "InvalidTransition",
            VerificationError::ConcurrentModification(_) => "ConcurrentModification",
            VerificationError::StorageUnavailable(_) => "StorageUnavailable",
        }
    }

    /// Business-rule violations are returned to the caller as typed
    /// results; everything else is an infrastructure fault.
    pub fn is_business_rule(&self) -> bool {
        !matches!(
            self,
            VerificationError::StorageUnavailable(_)
                | VerificationError::InvalidTransition(_)
                | VerificationError::ConcurrentModification(_)
        )
    }
}

impl From<StorageError> for VerificationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(msg) => VerificationError::ConcurrentModification(msg),
            other => VerificationError::StorageUnavailable(other),
        }
    }
}

/// Result type alias for verification operations
pub type VerificationResult<T> = Result<T, VerificationError>;
