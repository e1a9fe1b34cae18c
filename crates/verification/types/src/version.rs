//! Frozen policy versions
//!
//! A `PolicyVersion` is created exactly once, at activation, from the
//! policy's current levels. Its mode and levels have no setters: later
//! edits to the policy produce a new version instead of changing this one.
//! Only the supersession metadata (`unlock_reason`, `superseded_at`) is
//! written after creation.

use crate::{EntityType, LevelSpec, Policy, PolicyId, PolicyKey, VerificationMode, VersionRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of a policy's approval levels
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyVersion {
    version_id: u32,
    policy_id: PolicyId,
    branch_id: String,
    entity_type: EntityType,
    document_name: String,
    mode: VerificationMode,
    levels: Vec<LevelSpec>,
    activated_at: DateTime<Utc>,
    activated_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unlock_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    superseded_at: Option<DateTime<Utc>>,
}

impl PolicyVersion {
    /// Freeze the policy's current levels as `version_id`
    pub fn freeze(
        policy: &Policy,
        version_id: u32,
        activated_by: impl Into<String>,
        activated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version_id,
            policy_id: policy.id.clone(),
            branch_id: policy.branch_id.clone(),
            entity_type: policy.entity_type,
            document_name: policy.document_name.clone(),
            mode: policy.mode,
            levels: policy.levels.clone(),
            activated_at,
            activated_by: activated_by.into(),
            unlock_reason: None,
            superseded_at: None,
        }
    }

    pub fn reference(&self) -> VersionRef {
        VersionRef::new(self.policy_id.clone(), self.version_id)
    }

    pub fn version_id(&self) -> u32 {
        self.version_id
    }

    pub fn policy_id(&self) -> &PolicyId {
        &self.policy_id
    }

    pub fn key(&self) -> PolicyKey {
        PolicyKey::new(
            self.branch_id.clone(),
            self.entity_type,
            self.document_name.clone(),
        )
    }

    pub fn mode(&self) -> VerificationMode {
        self.mode
    }

    pub fn levels(&self) -> &[LevelSpec] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&LevelSpec> {
        self.levels.get(index)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Index of the final approval level, if there are any levels
    pub fn last_level_index(&self) -> Option<usize> {
        self.levels.len().checked_sub(1)
    }

    /// Documents bound to this version are verified on submission
    pub fn auto_verifies(&self) -> bool {
        self.mode == VerificationMode::None
    }

    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }

    pub fn activated_by(&self) -> &str {
        &self.activated_by
    }

    pub fn unlock_reason(&self) -> Option<&str> {
        self.unlock_reason.as_deref()
    }

    pub fn superseded_at(&self) -> Option<DateTime<Utc>> {
        self.superseded_at
    }

    // ── Supersession metadata ────────────────────────────────────────

    /// Record why the policy was reopened after this version
    pub fn annotate_unlock(&mut self, reason: impl Into<String>) {
        self.unlock_reason = Some(reason.into());
    }

    /// Record when a newer version replaced this one
    pub fn mark_superseded(&mut self, at: DateTime<Utc>) {
        if self.superseded_at.is_none() {
            self.superseded_at = Some(at);
        }
    }
}
