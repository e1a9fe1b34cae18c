//! Submission and decisions for verification requests

use crate::audit_log::AuditLog;
use crate::clock::Clock;
use crate::dedup::DecisionLedger;
use crate::locks::AggregateLocks;
use crate::policy_store::PolicyStore;
use crate::state_machine::{self, DecisionCommand};
use crate::storage::{RequestCommit, Storage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use verification_types::{
    AuditAction, AuditEntry, DocumentRef, EntityType, PolicyKey, RequestId, RequestState,
    VerificationError, VerificationRequest, VerificationResult,
};

/// Actor recorded for submissions that do not name one
pub const SYSTEM_ACTOR: &str = "system";

/// A document handed in for verification
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCommand {
    pub document_ref: DocumentRef,
    pub branch_id: String,
    pub entity_type: EntityType,
    pub document_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
}

impl SubmitCommand {
    pub fn new(
        document_ref: DocumentRef,
        branch_id: impl Into<String>,
        entity_type: EntityType,
        document_name: impl Into<String>,
    ) -> Self {
        Self {
            document_ref,
            branch_id: branch_id.into(),
            entity_type,
            document_name: document_name.into(),
            submitted_by: None,
        }
    }

    pub fn submitted_by(mut self, actor: impl Into<String>) -> Self {
        self.submitted_by = Some(actor.into());
        self
    }

    pub fn key(&self) -> PolicyKey {
        PolicyKey::new(
            self.branch_id.clone(),
            self.entity_type,
            self.document_name.clone(),
        )
    }
}

/// Drives requests through the levels of their bound policy version
#[derive(Clone)]
pub struct WorkflowEngine {
    storage: Arc<dyn Storage>,
    policies: PolicyStore,
    audit: AuditLog,
    locks: AggregateLocks,
    clock: Arc<dyn Clock>,
    ledger: Arc<DecisionLedger>,
}

impl WorkflowEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        policies: PolicyStore,
        audit: AuditLog,
        locks: AggregateLocks,
        clock: Arc<dyn Clock>,
        ledger: Arc<DecisionLedger>,
    ) -> Self {
        Self {
            storage,
            policies,
            audit,
            locks,
            clock,
            ledger,
        }
    }

    /// Bind a document to the active version for its key and open a request.
    ///
    /// Under a `None`-mode version the request is `Approved` immediately.
    pub async fn submit(&self, command: SubmitCommand) -> VerificationResult<VerificationRequest> {
        let version = self.policies.get_active_version(&command.key()).await?;
        let submitted_by = command
            .submitted_by
            .as_deref()
            .unwrap_or(SYSTEM_ACTOR)
            .to_string();
        let now = self.clock.now();

        let request =
            state_machine::start_request(&version, command.document_ref, &submitted_by, now)?;

        let action = if request.state() == RequestState::Approved {
            AuditAction::RequestAutoApproved
        } else {
            AuditAction::RequestSubmitted
        };
        let entry = AuditEntry::new(now, submitted_by, action, request.id().as_str())
            .with_after(&request);
        self.audit
            .commit_request(RequestCommit::insert(request.clone(), entry))
            .await?;

        tracing::info!(
            request_id = %request.id(),
            document = %request.document_ref(),
            version = %request.policy_version_id(),
            state = %request.state(),
            "Verification request submitted"
        );
        Ok(request)
    }

    /// Apply one decision at the request's current level.
    ///
    /// Serialized per request. A retry of an identical decision inside the
    /// dedup window returns the first call's result unchanged. When the
    /// request has since reached another level this actor may decide, a
    /// call without `expected_level` is ambiguous and fails `StaleLevel`.
    pub async fn decide(
        &self,
        request_id: &RequestId,
        command: DecisionCommand,
    ) -> VerificationResult<VerificationRequest> {
        let _guard = self.locks.lock_request(request_id).await;
        let now = self.clock.now();

        let mut request = self.load(request_id).await?;
        let version = self.policies.get_version(request.policy_version_id()).await?;

        if let Some(prior) = self.ledger.lookup(
            request_id,
            &command.actor,
            command.decision,
            command.expected_level,
            now,
        ) {
            let reopened_at = request.current_level_index().filter(|&current| {
                command.expected_level.is_none()
                    && current > prior.level_index
                    && version
                        .level(current)
                        .is_some_and(|level| command.actor.holds(level.role))
            });
            if let Some(current) = reopened_at {
                return Err(VerificationError::StaleLevel {
                    requested: prior.level_index,
                    current,
                });
            }

            tracing::warn!(
                request_id = %request_id,
                actor = %command.actor,
                decision = %command.decision,
                "Duplicate decision suppressed"
            );
            return Ok(prior.result);
        }

        let before = request.clone();
        let outcome = state_machine::apply_decision(&mut request, &version, &command, now)?;
        let level_index = before.current_level_index().unwrap_or_default();

        request.bump_revision();
        let entry = AuditEntry::new(
            now,
            command.actor.id.clone(),
            AuditAction::DecisionRecorded,
            request_id.as_str(),
        )
        .with_before(&before)
        .with_after(&request);
        self.audit
            .commit_request(RequestCommit::update(request.clone(), before.revision(), entry))
            .await?;
        self.ledger.record(
            request_id,
            &command.actor,
            command.decision,
            level_index,
            &request,
            now,
        );

        tracing::info!(
            request_id = %request_id,
            actor = %command.actor,
            decision = %command.decision,
            level = level_index,
            outcome = %outcome,
            "Decision recorded"
        );
        Ok(request)
    }

    pub async fn get_request(&self, id: &RequestId) -> VerificationResult<VerificationRequest> {
        self.load(id).await
    }

    /// Every request ever opened for one document slot, oldest first
    pub async fn list_for_document(
        &self,
        document_ref: &DocumentRef,
    ) -> VerificationResult<Vec<VerificationRequest>> {
        Ok(self.storage.list_requests_for_document(document_ref).await?)
    }

    /// Drop dedup entries older than the window
    pub fn purge_expired_decisions(&self) -> usize {
        self.ledger.purge_expired(self.clock.now())
    }

    async fn load(&self, id: &RequestId) -> VerificationResult<VerificationRequest> {
        self.storage
            .get_request(id)
            .await?
            .ok_or_else(|| VerificationError::RequestNotFound(id.clone()))
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("pending_dedup_entries", &self.ledger.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::InMemoryStorage;
    use verification_types::{
        Actor, Decision, LevelSpec, PolicyDraft, Role, SubjectType, VerificationMode,
    };

    struct Fixture {
        engine: WorkflowEngine,
        policies: PolicyStore,
        audit: AuditLog,
        storage: Arc<InMemoryStorage>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        let locks = AggregateLocks::new();
        let audit = AuditLog::new(storage.clone());
        let policies = PolicyStore::new(storage.clone(), audit.clone(), locks.clone(), clock.clone());
        let engine = WorkflowEngine::new(
            storage.clone(),
            policies.clone(),
            audit.clone(),
            locks,
            clock,
            Arc::new(DecisionLedger::default()),
        );
        Fixture {
            engine,
            policies,
            audit,
            storage,
        }
    }

    async fn activate_manual(policies: &PolicyStore) {
        let draft = PolicyDraft::new("br-1", EntityType::Student, "Birth Certificate", VerificationMode::Manual)
            .with_level(LevelSpec::new(Role::Admin, 24, true));
        let policy = policies.save_draft(draft, "admin-1").await.unwrap();
        policies.activate(&policy.id, "admin-1").await.unwrap();
    }

    fn submit_cmd() -> SubmitCommand {
        SubmitCommand::new(
            DocumentRef::new("student-1", "birth-certificate"),
            "br-1",
            EntityType::Student,
            "Birth Certificate",
        )
        .submitted_by("clerk-1")
    }

    #[tokio::test]
    async fn test_submit_without_active_version() {
        let f = fixture();
        let err = f.engine.submit(submit_cmd()).await.unwrap_err();
        assert!(matches!(err, VerificationError::NoActiveVersion(_)));
    }

    #[tokio::test]
    async fn test_submit_writes_audit() {
        let f = fixture();
        activate_manual(&f.policies).await;
        let req = f.engine.submit(submit_cmd()).await.unwrap();
        assert_eq!(req.state(), RequestState::Pending);
        assert_eq!(req.submitted_by(), "clerk-1");

        let entries = f.audit.query(SubjectType::Request, req.id().as_str()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::RequestSubmitted);
        assert_eq!(entries[0].actor, "clerk-1");
    }

    #[tokio::test]
    async fn test_duplicate_decision_suppressed() {
        let f = fixture();
        activate_manual(&f.policies).await;
        let req = f.engine.submit(submit_cmd()).await.unwrap();
        let approve = DecisionCommand::new(Actor::new("admin-1", Role::Admin), Decision::Approve);

        let first = f.engine.decide(req.id(), approve.clone()).await.unwrap();
        let second = f.engine.decide(req.id(), approve).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.state(), RequestState::Approved);
        assert_eq!(second.history().len(), 1);

        let entries = f.audit.query(SubjectType::Request, req.id().as_str()).await.unwrap();
        let decisions = entries
            .iter()
            .filter(|e| e.action == AuditAction::DecisionRecorded)
            .count();
        assert_eq!(decisions, 1);
    }

    #[tokio::test]
    async fn test_different_decision_on_finished_request_is_terminal() {
        let f = fixture();
        activate_manual(&f.policies).await;
        let req = f.engine.submit(submit_cmd()).await.unwrap();
        let admin = Actor::new("admin-1", Role::Admin);

        f.engine
            .decide(req.id(), DecisionCommand::new(admin.clone(), Decision::Approve))
            .await
            .unwrap();
        let err = f
            .engine
            .decide(req.id(), DecisionCommand::new(admin, Decision::Reject))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::RequestTerminal(_)));
    }

    #[tokio::test]
    async fn test_decide_unknown_request() {
        let f = fixture();
        let err = f
            .engine
            .decide(
                &RequestId::new("nope"),
                DecisionCommand::new(Actor::new("a", Role::Admin), Decision::Approve),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::RequestNotFound(_)));
    }

    #[tokio::test]
    async fn test_storage_outage_is_propagated() {
        let f = fixture();
        activate_manual(&f.policies).await;
        f.storage.set_unavailable(true);
        let err = f.engine.submit(submit_cmd()).await.unwrap_err();
        assert!(matches!(err, VerificationError::StorageUnavailable(_)));
        assert!(!err.is_business_rule());
    }

    #[tokio::test]
    async fn test_decision_with_audit_outage_is_retryable() {
        let f = fixture();
        activate_manual(&f.policies).await;
        let req = f.engine.submit(submit_cmd()).await.unwrap();
        let approve = DecisionCommand::new(Actor::new("admin-1", Role::Admin), Decision::Approve);

        f.storage.set_audit_unavailable(true);
        let err = f.engine.decide(req.id(), approve.clone()).await.unwrap_err();
        assert!(matches!(err, VerificationError::StorageUnavailable(_)));

        let unchanged = f.engine.get_request(req.id()).await.unwrap();
        assert_eq!(unchanged, req);

        f.storage.set_audit_unavailable(false);
        let approved = f.engine.decide(req.id(), approve).await.unwrap();
        assert_eq!(approved.state(), RequestState::Approved);
        assert_eq!(approved.history().len(), 1);

        let decisions = f
            .audit
            .query(SubjectType::Request, req.id().as_str())
            .await
            .unwrap()
            .iter()
            .filter(|e| e.action == AuditAction::DecisionRecorded)
            .count();
        assert_eq!(decisions, 1);
    }

    #[tokio::test]
    async fn test_submit_with_audit_outage_opens_nothing() {
        let f = fixture();
        activate_manual(&f.policies).await;
        f.storage.set_audit_unavailable(true);
        assert!(f.engine.submit(submit_cmd()).await.is_err());

        let listed = f
            .engine
            .list_for_document(&DocumentRef::new("student-1", "birth-certificate"))
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_same_actor_on_consecutive_same_role_levels() {
        let f = fixture();
        let draft = PolicyDraft::new("br-1", EntityType::Student, "Transcript", VerificationMode::Multi)
            .with_levels(vec![
                LevelSpec::new(Role::Admin, 24, true),
                LevelSpec::new(Role::Admin, 24, false),
            ]);
        let policy = f.policies.save_draft(draft, "admin-1").await.unwrap();
        f.policies.activate(&policy.id, "admin-1").await.unwrap();
        let req = f
            .engine
            .submit(SubmitCommand::new(
                DocumentRef::new("student-1", "transcript"),
                "br-1",
                EntityType::Student,
                "Transcript",
            ))
            .await
            .unwrap();
        let approve = DecisionCommand::new(Actor::new("admin-1", Role::Admin), Decision::Approve);

        let advanced = f.engine.decide(req.id(), approve.clone()).await.unwrap();
        assert_eq!(advanced.current_level_index(), Some(1));

        // Retry or second sign-off? Without a level it cannot be told apart
        let err = f.engine.decide(req.id(), approve.clone()).await.unwrap_err();
        assert_eq!(err, VerificationError::StaleLevel { requested: 0, current: 1 });
        assert_eq!(f.engine.get_request(req.id()).await.unwrap().history().len(), 1);

        // Naming the level resolves it either way
        let retried = f.engine.decide(req.id(), approve.clone().at_level(0)).await.unwrap();
        assert_eq!(retried, advanced);
        let approved = f.engine.decide(req.id(), approve.at_level(1)).await.unwrap();
        assert_eq!(approved.state(), RequestState::Approved);
        assert_eq!(approved.history().len(), 2);
    }

    #[tokio::test]
    async fn test_list_for_document() {
        let f = fixture();
        activate_manual(&f.policies).await;
        let first = f.engine.submit(submit_cmd()).await.unwrap();
        let second = f.engine.submit(submit_cmd()).await.unwrap();

        let listed = f
            .engine
            .list_for_document(&DocumentRef::new("student-1", "birth-certificate"))
            .await
            .unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.id().clone()).collect();
        assert_eq!(ids, vec![first.id().clone(), second.id().clone()]);
    }
}
