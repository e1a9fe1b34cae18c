//! Policy drafts, activation and unlock
//!
//! Activation freezes a draft's levels into a new [`PolicyVersion`] and
//! points the policy's key at it. Unlocking reopens the draft and never
//! touches a frozen version's levels.

use crate::audit_log::AuditLog;
use crate::clock::Clock;
use crate::locks::AggregateLocks;
use crate::storage::{PolicyCommit, Storage};
use std::sync::Arc;
use verification_types::{
    validate_levels, AuditAction, AuditEntry, EntityType, Policy, PolicyDraft, PolicyId,
    PolicyKey, PolicyStatus, PolicyVersion, VerificationError, VerificationMode,
    VerificationResult, VersionRef,
};

#[derive(Clone)]
pub struct PolicyStore {
    storage: Arc<dyn Storage>,
    audit: AuditLog,
    locks: AggregateLocks,
    clock: Arc<dyn Clock>,
}

impl PolicyStore {
    pub fn new(
        storage: Arc<dyn Storage>,
        audit: AuditLog,
        locks: AggregateLocks,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            audit,
            locks,
            clock,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Create a draft, or replace an existing draft when `draft.id` is set.
    ///
    /// Fails `InvalidLevelCount` / `InvalidSla` on a malformed level list,
    /// `PolicyNotDraft` when the target policy is locked, and `Validation`
    /// when a policy that has been activated would move to another key.
    pub async fn save_draft(&self, draft: PolicyDraft, actor: &str) -> VerificationResult<Policy> {
        draft.validate()?;
        let now = self.clock.now();

        let Some(id) = draft.id.clone() else {
            let policy = Policy::from_draft(draft, now);
            let entry = AuditEntry::new(now, actor, AuditAction::PolicyDraftSaved, policy.id.as_str())
                .with_after(&policy);
            self.audit
                .commit_policy(PolicyCommit::insert(policy.clone(), entry))
                .await?;
            tracing::info!(policy_id = %policy.id, key = %policy.key(), "Policy draft created");
            return Ok(policy);
        };

        let _guard = self.locks.lock_policy(&id).await;
        let mut policy = self.load(&id).await?;
        if !policy.is_draft() {
            return Err(VerificationError::PolicyNotDraft(id));
        }
        // Its versions stay active under the old key; a new key is a new policy
        if policy.latest_version.is_some() && draft.key() != policy.key() {
            return Err(VerificationError::Validation(format!(
                "policy {} was activated for {}; its key cannot change to {}",
                id,
                policy.key(),
                draft.key()
            )));
        }

        let before = policy.clone();
        policy.apply_draft(draft, now);
        policy.revision += 1;
        let entry = AuditEntry::new(now, actor, AuditAction::PolicyDraftSaved, id.as_str())
            .with_before(&before)
            .with_after(&policy);
        self.audit
            .commit_policy(PolicyCommit::update(policy.clone(), before.revision, entry))
            .await?;

        tracing::info!(policy_id = %id, revision = policy.revision, "Policy draft updated");
        Ok(policy)
    }

    /// Freeze the draft into the next version and lock the policy.
    ///
    /// The new version, the superseded mark on the previous one, the
    /// active pointer, the locked policy and the audit entry are one commit.
    pub async fn activate(&self, id: &PolicyId, actor: &str) -> VerificationResult<PolicyVersion> {
        let _guard = self.locks.lock_policy(id).await;
        let mut policy = self.load(id).await?;

        if !policy.is_draft() {
            return Err(VerificationError::PolicyNotDraft(id.clone()));
        }
        if policy.mode == VerificationMode::Multi && policy.levels.len() < 2 {
            return Err(VerificationError::EmptyMultiLevel {
                policy_id: id.clone(),
                actual: policy.levels.len(),
            });
        }
        validate_levels(policy.mode, &policy.levels)?;

        let now = self.clock.now();
        let version = PolicyVersion::freeze(&policy, policy.next_version(), actor, now);

        let before = policy.clone();
        policy.status = PolicyStatus::Locked;
        policy.latest_version = Some(version.version_id());
        policy.revision += 1;
        policy.updated_at = now;

        let entry = AuditEntry::new(now, actor, AuditAction::PolicyActivated, id.as_str())
            .with_before(&before)
            .with_after(&version);
        let mut commit = PolicyCommit::update(policy, before.revision, entry).activating(version.clone());
        if let Some(previous) = before.latest_version {
            let reference = VersionRef::new(id.clone(), previous);
            if let Some(mut superseded) = self.storage.get_version(&reference).await? {
                superseded.mark_superseded(now);
                commit = commit.annotating(superseded);
            }
        }
        self.audit.commit_policy(commit).await?;

        tracing::info!(
            policy_id = %id,
            version = version.version_id(),
            mode = %version.mode(),
            levels = version.level_count(),
            "Policy activated"
        );
        Ok(version)
    }

    /// Return a locked policy to `Draft`. The reason is required and is
    /// stamped on the latest version and the audit entry.
    pub async fn unlock(
        &self,
        id: &PolicyId,
        actor: &str,
        reason: &str,
    ) -> VerificationResult<Policy> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(VerificationError::ReasonRequired);
        }

        let _guard = self.locks.lock_policy(id).await;
        let mut policy = self.load(id).await?;
        if !policy.is_locked() {
            return Err(VerificationError::PolicyNotLocked(id.clone()));
        }

        let now = self.clock.now();
        let before = policy.clone();
        policy.status = PolicyStatus::Draft;
        policy.revision += 1;
        policy.updated_at = now;

        let entry = AuditEntry::new(now, actor, AuditAction::PolicyUnlocked, id.as_str())
            .with_before(&before)
            .with_after(&policy)
            .with_reason(reason);
        let mut commit = PolicyCommit::update(policy.clone(), before.revision, entry);
        if let Some(latest) = policy.latest_version {
            let reference = VersionRef::new(id.clone(), latest);
            if let Some(mut version) = self.storage.get_version(&reference).await? {
                version.annotate_unlock(reason);
                commit = commit.annotating(version);
            }
        }
        self.audit.commit_policy(commit).await?;

        tracing::info!(policy_id = %id, reason = %reason, "Policy unlocked");
        Ok(policy)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// The version new submissions for this key bind to
    pub async fn get_active_version(&self, key: &PolicyKey) -> VerificationResult<PolicyVersion> {
        let reference = self
            .storage
            .get_active_version(key)
            .await?
            .ok_or_else(|| VerificationError::NoActiveVersion(key.clone()))?;
        self.get_version(&reference).await
    }

    pub async fn get_policy(&self, id: &PolicyId) -> VerificationResult<Policy> {
        self.load(id).await
    }

    pub async fn list_policies(
        &self,
        branch_id: Option<&str>,
        entity_type: Option<EntityType>,
    ) -> VerificationResult<Vec<Policy>> {
        Ok(self.storage.list_policies(branch_id, entity_type).await?)
    }

    /// Every frozen version of a policy, oldest first
    pub async fn list_versions(&self, id: &PolicyId) -> VerificationResult<Vec<PolicyVersion>> {
        self.load(id).await?;
        Ok(self.storage.list_versions(id).await?)
    }

    pub async fn get_version(&self, reference: &VersionRef) -> VerificationResult<PolicyVersion> {
        self.storage
            .get_version(reference)
            .await?
            .ok_or_else(|| VerificationError::VersionNotFound(reference.clone()))
    }

    async fn load(&self, id: &PolicyId) -> VerificationResult<Policy> {
        self.storage
            .get_policy(id)
            .await?
            .ok_or_else(|| VerificationError::PolicyNotFound(id.clone()))
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
