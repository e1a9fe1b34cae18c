//! In-memory storage implementation

use super::ensure_frozen_unchanged;
use super::traits::*;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use verification_types::{
    AuditEntry, DocumentRef, EntityType, Policy, PolicyId, PolicyKey, PolicyVersion, RequestId,
    StorageError, SubjectType, VerificationRequest, VersionRef,
};

/// In-memory storage for development and testing
#[derive(Debug)]
pub struct InMemoryStorage {
    policies: Arc<RwLock<HashMap<PolicyId, Policy>>>,
    versions: Arc<RwLock<HashMap<PolicyId, Vec<PolicyVersion>>>>,
    active_versions: Arc<DashMap<PolicyKey, VersionRef>>,
    requests: Arc<RwLock<HashMap<RequestId, VerificationRequest>>>,
    requests_by_document: Arc<DashMap<DocumentRef, Vec<RequestId>>>,
    audit: Arc<RwLock<Vec<AuditEntry>>>,
    audit_sequence: Arc<AtomicU64>,
    unavailable: Arc<AtomicBool>,
    audit_unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self {
            policies: Arc::new(RwLock::new(HashMap::new())),
            versions: Arc::new(RwLock::new(HashMap::new())),
            active_versions: Arc::new(DashMap::new()),
            requests: Arc::new(RwLock::new(HashMap::new())),
            requests_by_document: Arc::new(DashMap::new()),
            audit: Arc::new(RwLock::new(Vec::new())),
            audit_sequence: Arc::new(AtomicU64::new(0)),
            unavailable: Arc::new(AtomicBool::new(false)),
            audit_unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate an outage: while set, every operation fails with
    /// `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail only audit writes: `append_audit` and every commit. Reads and
    /// plain row writes keep working.
    pub fn set_audit_unavailable(&self, unavailable: bool) {
        self.audit_unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory store offline".into()));
        }
        Ok(())
    }

    fn ensure_audit_writable(&self) -> StorageResult<()> {
        self.ensure_available()?;
        if self.audit_unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("audit trail offline".into()));
        }
        Ok(())
    }

    /// Assign the next sequence number and append
    fn push_audit(&self, audit: &mut Vec<AuditEntry>, mut entry: AuditEntry) -> AuditEntry {
        entry.sequence = self.audit_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        audit.push(entry.clone());
        entry
    }

    fn check_revision(kind: &str, id: &str, stored: u64, expected: u64) -> StorageResult<()> {
        if stored != expected {
            return Err(StorageError::Conflict(format!(
                "{} {} is at revision {}, expected {}",
                kind, id, stored, expected
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyRepository for InMemoryStorage {
    async fn get_policy(&self, id: &PolicyId) -> StorageResult<Option<Policy>> {
        self.ensure_available()?;
        let policies = self.policies.read().await;
        Ok(policies.get(id).cloned())
    }

    async fn list_policies(
        &self,
        branch_id: Option<&str>,
        entity_type: Option<EntityType>,
    ) -> StorageResult<Vec<Policy>> {
        self.ensure_available()?;
        let policies = self.policies.read().await;
        let mut matching: Vec<Policy> = policies
            .values()
            .filter(|p| branch_id.map_or(true, |b| p.branch_id == b))
            .filter(|p| entity_type.map_or(true, |e| p.entity_type == e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.document_name
                .cmp(&b.document_name)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(matching)
    }

    async fn insert_policy(&self, policy: Policy) -> StorageResult<()> {
        self.ensure_available()?;
        let mut policies = self.policies.write().await;
        if policies.contains_key(&policy.id) {
            return Err(StorageError::Conflict(format!(
                "policy {} already exists",
                policy.id
            )));
        }
        policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    async fn update_policy(&self, policy: Policy, expected_revision: u64) -> StorageResult<()> {
        self.ensure_available()?;
        let mut policies = self.policies.write().await;
        let stored = policies
            .get_mut(&policy.id)
            .ok_or_else(|| StorageError::NotFound(format!("policy {}", policy.id)))?;
        Self::check_revision("policy", policy.id.as_str(), stored.revision, expected_revision)?;
        *stored = policy;
        Ok(())
    }
}

#[async_trait]
impl PolicyVersionRepository for InMemoryStorage {
    async fn insert_version(&self, version: PolicyVersion) -> StorageResult<()> {
        self.ensure_available()?;
        let mut versions = self.versions.write().await;
        let history = versions.entry(version.policy_id().clone()).or_default();
        if history
            .iter()
            .any(|v| v.version_id() == version.version_id())
        {
            return Err(StorageError::Conflict(format!(
                "version {} already exists",
                version.reference()
            )));
        }
        history.push(version);
        history.sort_by_key(|v| v.version_id());
        Ok(())
    }

    async fn get_version(&self, reference: &VersionRef) -> StorageResult<Option<PolicyVersion>> {
        self.ensure_available()?;
        let versions = self.versions.read().await;
        Ok(versions.get(&reference.policy_id).and_then(|history| {
            history
                .iter()
                .find(|v| v.version_id() == reference.version_id)
                .cloned()
        }))
    }

    async fn list_versions(&self, policy_id: &PolicyId) -> StorageResult<Vec<PolicyVersion>> {
        self.ensure_available()?;
        let versions = self.versions.read().await;
        Ok(versions.get(policy_id).cloned().unwrap_or_default())
    }

    async fn update_version_metadata(&self, version: PolicyVersion) -> StorageResult<()> {
        self.ensure_available()?;
        let mut versions = self.versions.write().await;
        let stored = versions
            .get_mut(version.policy_id())
            .and_then(|history| {
                history
                    .iter_mut()
                    .find(|v| v.version_id() == version.version_id())
            })
            .ok_or_else(|| StorageError::NotFound(format!("version {}", version.reference())))?;
        ensure_frozen_unchanged(stored, &version)?;
        *stored = version;
        Ok(())
    }

    async fn set_active_version(
        &self,
        key: &PolicyKey,
        reference: VersionRef,
    ) -> StorageResult<()> {
        self.ensure_available()?;
        self.active_versions.insert(key.clone(), reference);
        Ok(())
    }

    async fn get_active_version(&self, key: &PolicyKey) -> StorageResult<Option<VersionRef>> {
        self.ensure_available()?;
        Ok(self.active_versions.get(key).map(|r| r.value().clone()))
    }
}

#[async_trait]
impl RequestRepository for InMemoryStorage {
    async fn insert_request(&self, request: VerificationRequest) -> StorageResult<()> {
        self.ensure_available()?;
        let mut requests = self.requests.write().await;
        if requests.contains_key(request.id()) {
            return Err(StorageError::Conflict(format!(
                "request {} already exists",
                request.id()
            )));
        }
        self.requests_by_document
            .entry(request.document_ref().clone())
            .or_default()
            .push(request.id().clone());
        requests.insert(request.id().clone(), request);
        Ok(())
    }

    async fn get_request(&self, id: &RequestId) -> StorageResult<Option<VerificationRequest>> {
        self.ensure_available()?;
        let requests = self.requests.read().await;
        Ok(requests.get(id).cloned())
    }

    async fn update_request(
        &self,
        request: VerificationRequest,
        expected_revision: u64,
    ) -> StorageResult<()> {
        self.ensure_available()?;
        let mut requests = self.requests.write().await;
        let stored = requests
            .get_mut(request.id())
            .ok_or_else(|| StorageError::NotFound(format!("request {}", request.id())))?;
        Self::check_revision(
            "request",
            request.id().as_str(),
            stored.revision(),
            expected_revision,
        )?;
        *stored = request;
        Ok(())
    }

    async fn list_open_requests(&self) -> StorageResult<Vec<VerificationRequest>> {
        self.ensure_available()?;
        let requests = self.requests.read().await;
        let mut open: Vec<VerificationRequest> =
            requests.values().filter(|r| r.is_open()).cloned().collect();
        open.sort_by_key(|r| r.created_at());
        Ok(open)
    }

    async fn list_requests_for_document(
        &self,
        document_ref: &DocumentRef,
    ) -> StorageResult<Vec<VerificationRequest>> {
        self.ensure_available()?;
        let ids = self
            .requests_by_document
            .get(document_ref)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        let requests = self.requests.read().await;
        Ok(ids.iter().filter_map(|id| requests.get(id).cloned()).collect())
    }
}

#[async_trait]
impl AuditRepository for InMemoryStorage {
    async fn append_audit(&self, entry: AuditEntry) -> StorageResult<AuditEntry> {
        self.ensure_audit_writable()?;
        let mut audit = self.audit.write().await;
        Ok(self.push_audit(&mut audit, entry))
    }

    async fn query_audit(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> StorageResult<Vec<AuditEntry>> {
        self.ensure_available()?;
        let audit = self.audit.read().await;
        let mut entries: Vec<AuditEntry> = audit
            .iter()
            .filter(|e| e.subject_type == subject_type && e.subject_id == subject_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        Ok(entries)
    }
}

// Tables are locked in a fixed order (policies, versions, requests, audit)
// and every precondition is checked before the first mutation.
#[async_trait]
impl CommitRepository for InMemoryStorage {
    async fn commit_policy(&self, commit: PolicyCommit) -> StorageResult<AuditEntry> {
        self.ensure_audit_writable()?;
        let mut policies = self.policies.write().await;
        let mut versions = self.versions.write().await;
        let mut audit = self.audit.write().await;

        let id = commit.policy.id.clone();
        match (commit.expected_revision, policies.get(&id)) {
            (None, Some(_)) => {
                return Err(StorageError::Conflict(format!("policy {} already exists", id)));
            }
            (None, None) => {}
            (Some(_), None) => return Err(StorageError::NotFound(format!("policy {}", id))),
            (Some(expected), Some(stored)) => {
                Self::check_revision("policy", id.as_str(), stored.revision, expected)?;
            }
        }

        if let Some(version) = &commit.activated {
            let taken = versions.get(version.policy_id()).is_some_and(|history| {
                history
                    .iter()
                    .any(|v| v.version_id() == version.version_id())
            });
            if taken {
                return Err(StorageError::Conflict(format!(
                    "version {} already exists",
                    version.reference()
                )));
            }
        }
        for version in &commit.annotated {
            let stored = versions
                .get(version.policy_id())
                .and_then(|history| {
                    history
                        .iter()
                        .find(|v| v.version_id() == version.version_id())
                })
                .ok_or_else(|| {
                    StorageError::NotFound(format!("version {}", version.reference()))
                })?;
            ensure_frozen_unchanged(stored, version)?;
        }

        policies.insert(id, commit.policy);
        for version in commit.annotated {
            if let Some(stored) = versions.get_mut(version.policy_id()).and_then(|history| {
                history
                    .iter_mut()
                    .find(|v| v.version_id() == version.version_id())
            }) {
                *stored = version;
            }
        }
        if let Some(version) = commit.activated {
            self.active_versions
                .insert(version.key(), version.reference());
            let history = versions.entry(version.policy_id().clone()).or_default();
            history.push(version);
            history.sort_by_key(|v| v.version_id());
        }
        Ok(self.push_audit(&mut audit, commit.audit))
    }

    async fn commit_request(&self, commit: RequestCommit) -> StorageResult<AuditEntry> {
        self.ensure_audit_writable()?;
        let mut requests = self.requests.write().await;
        let mut audit = self.audit.write().await;

        let id = commit.request.id().clone();
        match (commit.expected_revision, requests.get(&id)) {
            (None, Some(_)) => {
                return Err(StorageError::Conflict(format!("request {} already exists", id)));
            }
            (None, None) => {
                self.requests_by_document
                    .entry(commit.request.document_ref().clone())
                    .or_default()
                    .push(id.clone());
            }
            (Some(_), None) => return Err(StorageError::NotFound(format!("request {}", id))),
            (Some(expected), Some(stored)) => {
                Self::check_revision("request", id.as_str(), stored.revision(), expected)?;
            }
        }

        requests.insert(id, commit.request);
        Ok(self.push_audit(&mut audit, commit.audit))
    }
}

impl Storage for InMemoryStorage {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use verification_types::{
        AuditAction, LevelSpec, PolicyDraft, Role, VerificationMode,
    };

    fn policy() -> Policy {
        let draft = PolicyDraft::new(
            "br-1",
            EntityType::Student,
            "Birth Certificate",
            VerificationMode::Manual,
        )
        .with_level(LevelSpec::new(Role::Admin, 24, true));
        Policy::from_draft(draft, Utc::now())
    }

    #[tokio::test]
    async fn test_policy_revision_check() {
        let storage = InMemoryStorage::new();
        let mut p = policy();
        storage.insert_policy(p.clone()).await.unwrap();
        assert!(matches!(
            storage.insert_policy(p.clone()).await,
            Err(StorageError::Conflict(_))
        ));

        p.revision = 1;
        storage.update_policy(p.clone(), 0).await.unwrap();
        let stale = storage.update_policy(p.clone(), 0).await;
        assert!(matches!(stale, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_version_metadata_cannot_touch_levels() {
        let storage = InMemoryStorage::new();
        let mut p = policy();
        let v1 = PolicyVersion::freeze(&p, 1, "admin", Utc::now());
        storage.insert_version(v1.clone()).await.unwrap();

        let mut annotated = v1.clone();
        annotated.annotate_unlock("needs a second level");
        storage.update_version_metadata(annotated).await.unwrap();

        p.levels.push(LevelSpec::new(Role::Registrar, 12, false));
        let forged = PolicyVersion::freeze(&p, 1, "admin", v1.activated_at());
        assert!(matches!(
            storage.update_version_metadata(forged).await,
            Err(StorageError::InvalidData(_))
        ));

        let stored = storage.get_version(&v1.reference()).await.unwrap().unwrap();
        assert_eq!(stored.levels().len(), 1);
        assert_eq!(stored.unlock_reason(), Some("needs a second level"));
    }

    #[tokio::test]
    async fn test_audit_sequence_and_order() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        let later = AuditEntry::new(now + chrono::Duration::seconds(5), "a", AuditAction::PolicyActivated, "p1");
        let earlier = AuditEntry::new(now, "a", AuditAction::PolicyDraftSaved, "p1");
        let other = AuditEntry::new(now, "a", AuditAction::PolicyDraftSaved, "p2");

        let first = storage.append_audit(later).await.unwrap();
        let second = storage.append_audit(earlier).await.unwrap();
        storage.append_audit(other).await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);

        let entries = storage.query_audit(SubjectType::Policy, "p1").await.unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::PolicyDraftSaved, AuditAction::PolicyActivated]
        );
    }

    #[tokio::test]
    async fn test_policy_commit_is_all_or_nothing() {
        let storage = InMemoryStorage::new();
        let mut p = policy();
        storage
            .commit_policy(PolicyCommit::insert(
                p.clone(),
                AuditEntry::new(Utc::now(), "admin", AuditAction::PolicyDraftSaved, p.id.as_str()),
            ))
            .await
            .unwrap();

        let v1 = PolicyVersion::freeze(&p, 1, "admin", Utc::now());
        p.latest_version = Some(1);
        p.revision = 1;
        let activated = AuditEntry::new(Utc::now(), "admin", AuditAction::PolicyActivated, p.id.as_str());

        // A stale revision leaves every table untouched
        let stale = PolicyCommit::update(p.clone(), 7, activated.clone()).activating(v1.clone());
        assert!(matches!(
            storage.commit_policy(stale).await,
            Err(StorageError::Conflict(_))
        ));
        assert!(storage.list_versions(&p.id).await.unwrap().is_empty());
        assert!(storage.get_active_version(&p.key()).await.unwrap().is_none());
        assert_eq!(storage.get_policy(&p.id).await.unwrap().unwrap().revision, 0);
        assert_eq!(storage.query_audit(SubjectType::Policy, p.id.as_str()).await.unwrap().len(), 1);

        let entry = storage
            .commit_policy(PolicyCommit::update(p.clone(), 0, activated).activating(v1.clone()))
            .await
            .unwrap();
        assert_eq!(entry.sequence, 2);
        assert_eq!(storage.get_active_version(&p.key()).await.unwrap(), Some(v1.reference()));
        assert_eq!(storage.get_policy(&p.id).await.unwrap().unwrap().latest_version, Some(1));
    }

    #[tokio::test]
    async fn test_audit_outage_blocks_commits_not_reads() {
        let storage = InMemoryStorage::new();
        let p = policy();
        storage.insert_policy(p.clone()).await.unwrap();
        storage.set_audit_unavailable(true);

        let commit = PolicyCommit::update(
            Policy { revision: 1, ..p.clone() },
            0,
            AuditEntry::new(Utc::now(), "admin", AuditAction::PolicyDraftSaved, p.id.as_str()),
        );
        assert!(matches!(
            storage.commit_policy(commit).await,
            Err(StorageError::Unavailable(_))
        ));
        assert_eq!(storage.get_policy(&p.id).await.unwrap().unwrap().revision, 0);

        storage.set_audit_unavailable(false);
        assert!(storage.query_audit(SubjectType::Policy, p.id.as_str()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let storage = InMemoryStorage::new();
        storage.set_unavailable(true);
        assert!(matches!(
            storage.get_policy(&PolicyId::new("x")).await,
            Err(StorageError::Unavailable(_))
        ));
        storage.set_unavailable(false);
        assert!(storage.get_policy(&PolicyId::new("x")).await.unwrap().is_none());
    }
}
