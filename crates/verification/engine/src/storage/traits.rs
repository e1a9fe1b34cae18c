//! Storage trait definitions

use async_trait::async_trait;
use verification_types::{
    AuditEntry, DocumentRef, EntityType, Policy, PolicyId, PolicyKey, PolicyVersion, RequestId,
    StorageError, SubjectType, VerificationRequest, VersionRef,
};

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Combined storage trait
#[async_trait]
pub trait Storage:
    PolicyRepository
    + PolicyVersionRepository
    + RequestRepository
    + AuditRepository
    + CommitRepository
    + Send
    + Sync
{
}

// ── Atomic commits ───────────────────────────────────────────────────

/// Every write one policy command makes, together with its audit entry
#[derive(Clone, Debug)]
pub struct PolicyCommit {
    pub policy: Policy,
    /// `None` inserts a new policy; `Some` replaces the stored one at that
    /// revision
    pub expected_revision: Option<u64>,
    /// A freshly frozen version, inserted and made active for its key
    pub activated: Option<PolicyVersion>,
    /// Metadata rewrites of existing versions (supersession, unlock notes)
    pub annotated: Vec<PolicyVersion>,
    pub audit: AuditEntry,
}

impl PolicyCommit {
    pub fn insert(policy: Policy, audit: AuditEntry) -> Self {
        Self {
            policy,
            expected_revision: None,
            activated: None,
            annotated: Vec::new(),
            audit,
        }
    }

    pub fn update(policy: Policy, expected_revision: u64, audit: AuditEntry) -> Self {
        Self {
            expected_revision: Some(expected_revision),
            ..Self::insert(policy, audit)
        }
    }

    pub fn activating(mut self, version: PolicyVersion) -> Self {
        self.activated = Some(version);
        self
    }

    pub fn annotating(mut self, version: PolicyVersion) -> Self {
        self.annotated.push(version);
        self
    }
}

/// A request write and its audit entry
#[derive(Clone, Debug)]
pub struct RequestCommit {
    pub request: VerificationRequest,
    /// `None` inserts a new request
    pub expected_revision: Option<u64>,
    pub audit: AuditEntry,
}

impl RequestCommit {
    pub fn insert(request: VerificationRequest, audit: AuditEntry) -> Self {
        Self {
            request,
            expected_revision: None,
            audit,
        }
    }

    pub fn update(request: VerificationRequest, expected_revision: u64, audit: AuditEntry) -> Self {
        Self {
            request,
            expected_revision: Some(expected_revision),
            audit,
        }
    }
}

/// All-or-nothing writes. Either every row of a commit and its audit entry
/// become visible, or none do.
#[async_trait]
pub trait CommitRepository: Send + Sync {
    /// Apply a policy commit and return the audit entry with its sequence
    async fn commit_policy(&self, commit: PolicyCommit) -> StorageResult<AuditEntry>;

    /// Apply a request commit and return the audit entry with its sequence
    async fn commit_request(&self, commit: RequestCommit) -> StorageResult<AuditEntry>;
}

/// Storage for editable policies
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Get a policy by ID
    async fn get_policy(&self, id: &PolicyId) -> StorageResult<Option<Policy>>;

    /// List policies, optionally filtered by branch and entity type
    async fn list_policies(
        &self,
        branch_id: Option<&str>,
        entity_type: Option<EntityType>,
    ) -> StorageResult<Vec<Policy>>;

    /// Insert a new policy. `Conflict` if the ID is taken.
    async fn insert_policy(&self, policy: Policy) -> StorageResult<()>;

    /// Replace a policy whose stored revision equals `expected_revision`
    async fn update_policy(&self, policy: Policy, expected_revision: u64) -> StorageResult<()>;
}

/// Storage for frozen policy versions and the active-version index
#[async_trait]
pub trait PolicyVersionRepository: Send + Sync {
    /// Insert a freshly frozen version. `Conflict` if the number is taken.
    async fn insert_version(&self, version: PolicyVersion) -> StorageResult<()>;

    async fn get_version(&self, reference: &VersionRef) -> StorageResult<Option<PolicyVersion>>;

    /// All versions of a policy, oldest first
    async fn list_versions(&self, policy_id: &PolicyId) -> StorageResult<Vec<PolicyVersion>>;

    /// Persist supersession metadata. Implementations reject any change to
    /// the frozen mode or levels with `InvalidData`.
    async fn update_version_metadata(&self, version: PolicyVersion) -> StorageResult<()>;

    /// Point a policy key at the version new submissions bind to
    async fn set_active_version(&self, key: &PolicyKey, reference: VersionRef)
        -> StorageResult<()>;

    async fn get_active_version(&self, key: &PolicyKey) -> StorageResult<Option<VersionRef>>;
}

/// Storage for verification requests
#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert_request(&self, request: VerificationRequest) -> StorageResult<()>;

    async fn get_request(&self, id: &RequestId) -> StorageResult<Option<VerificationRequest>>;

    /// Replace a request whose stored revision equals `expected_revision`
    async fn update_request(
        &self,
        request: VerificationRequest,
        expected_revision: u64,
    ) -> StorageResult<()>;

    /// Requests in `Pending` or `Escalated`
    async fn list_open_requests(&self) -> StorageResult<Vec<VerificationRequest>>;

    /// Requests for one document slot, oldest first
    async fn list_requests_for_document(
        &self,
        document_ref: &DocumentRef,
    ) -> StorageResult<Vec<VerificationRequest>>;
}

/// Append-only storage for audit entries
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append an entry and return it with its assigned sequence number
    async fn append_audit(&self, entry: AuditEntry) -> StorageResult<AuditEntry>;

    /// Entries for one subject ordered by timestamp, then sequence
    async fn query_audit(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> StorageResult<Vec<AuditEntry>>;
}
