//! Verification policies: the editable rule set for one document type
//!
//! A policy is mutable only while it is a `Draft`. Activation freezes its
//! levels into a [`PolicyVersion`](crate::PolicyVersion) and locks it;
//! unlocking returns it to `Draft` without touching any frozen version.

use crate::{PolicyId, PolicyKey, Role, VerificationError, VerificationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Maximum number of approval levels a multi-level policy may define
pub const MAX_LEVELS: usize = 3;

/// Longest SLA a level may carry (366 days)
pub const MAX_SLA_HOURS: u32 = 24 * 366;

// ── Entity Type ──────────────────────────────────────────────────────

/// The kind of record a document belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Student,
    Employee,
    Parent,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Student => "student",
            EntityType::Employee => "employee",
            EntityType::Parent => "parent",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "student" => Ok(EntityType::Student),
            "employee" => Ok(EntityType::Employee),
            "parent" => Ok(EntityType::Parent),
            other => Err(VerificationError::UnknownEntityType(other.to_string())),
        }
    }
}

// ── Verification Mode ────────────────────────────────────────────────

/// How many approval levels a document passes through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationMode {
    /// Auto-verified on submission
    None,
    /// Exactly one approval level
    Manual,
    /// Two or three sequential approval levels
    Multi,
}

impl VerificationMode {
    /// The number of levels this mode admits
    pub fn level_range(&self) -> RangeInclusive<usize> {
        match self {
            VerificationMode::None => 0..=0,
            VerificationMode::Manual => 1..=1,
            VerificationMode::Multi => 2..=MAX_LEVELS,
        }
    }

    pub fn admits(&self, level_count: usize) -> bool {
        self.level_range().contains(&level_count)
    }
}

impl std::fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VerificationMode::None => "None",
            VerificationMode::Manual => "Manual",
            VerificationMode::Multi => "Multi",
        };
        f.write_str(s)
    }
}

// ── Level Specification ──────────────────────────────────────────────

/// One approval step: who decides, how long they have, and whether they
/// may reject
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSpec {
    pub role: Role,
    pub sla_hours: u32,
    pub can_reject: bool,
}

impl LevelSpec {
    pub fn new(role: Role, sla_hours: u32, can_reject: bool) -> Self {
        Self {
            role,
            sla_hours,
            can_reject,
        }
    }

    /// The SLA window as a duration
    pub fn sla(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.sla_hours))
    }
}

/// Check that `levels` fits `mode` and that every SLA lies in
/// `1..=MAX_SLA_HOURS`.
pub fn validate_levels(mode: VerificationMode, levels: &[LevelSpec]) -> VerificationResult<()> {
    if !mode.admits(levels.len()) {
        let range = mode.level_range();
        return Err(VerificationError::InvalidLevelCount {
            mode,
            min: *range.start(),
            max: *range.end(),
            actual: levels.len(),
        });
    }

    if let Some(index) = levels
        .iter()
        .position(|l| l.sla_hours == 0 || l.sla_hours > MAX_SLA_HOURS)
    {
        return Err(VerificationError::InvalidSla { level_index: index });
    }

    Ok(())
}

// ── Policy Status ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyStatus {
    Draft,
    Locked,
}

impl std::fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyStatus::Draft => f.write_str("Draft"),
            PolicyStatus::Locked => f.write_str("Locked"),
        }
    }
}

// ── Policy Draft (input) ─────────────────────────────────────────────

/// The fields an editor submits when saving a draft.
///
/// Without an `id` a new policy is created. With an `id` the existing
/// draft is replaced.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PolicyId>,
    pub branch_id: String,
    pub entity_type: EntityType,
    pub document_name: String,
    #[serde(default)]
    pub category: String,
    pub mode: VerificationMode,
    #[serde(default)]
    pub levels: Vec<LevelSpec>,
}

impl PolicyDraft {
    pub fn new(
        branch_id: impl Into<String>,
        entity_type: EntityType,
        document_name: impl Into<String>,
        mode: VerificationMode,
    ) -> Self {
        Self {
            id: None,
            branch_id: branch_id.into(),
            entity_type,
            document_name: document_name.into(),
            category: String::new(),
            mode,
            levels: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: PolicyId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_level(mut self, level: LevelSpec) -> Self {
        self.levels.push(level);
        self
    }

    pub fn with_levels(mut self, levels: Vec<LevelSpec>) -> Self {
        self.levels = levels;
        self
    }

    pub fn key(&self) -> PolicyKey {
        PolicyKey::new(
            self.branch_id.clone(),
            self.entity_type,
            self.document_name.clone(),
        )
    }

    /// Validate the draft's shape before anything is persisted
    pub fn validate(&self) -> VerificationResult<()> {
        if self.branch_id.trim().is_empty() {
            return Err(VerificationError::Validation("branchId is required".into()));
        }
        if self.document_name.trim().is_empty() {
            return Err(VerificationError::Validation(
                "documentName is required".into(),
            ));
        }
        validate_levels(self.mode, &self.levels)
    }
}

// ── Policy ───────────────────────────────────────────────────────────

/// A verification policy as stored
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: PolicyId,
    pub branch_id: String,
    pub entity_type: EntityType,
    pub document_name: String,
    pub category: String,
    pub mode: VerificationMode,
    pub levels: Vec<LevelSpec>,
    pub status: PolicyStatus,
    /// Highest version number frozen so far (None until first activation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<u32>,
    /// Bumped on every write; used for optimistic concurrency checks
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    /// Build a fresh draft policy from editor input
    pub fn from_draft(draft: PolicyDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: draft.id.unwrap_or_else(PolicyId::generate),
            branch_id: draft.branch_id,
            entity_type: draft.entity_type,
            document_name: draft.document_name,
            category: draft.category,
            mode: draft.mode,
            levels: draft.levels,
            status: PolicyStatus::Draft,
            latest_version: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the editable fields with a new draft, keeping identity and
    /// version history
    pub fn apply_draft(&mut self, draft: PolicyDraft, now: DateTime<Utc>) {
        self.branch_id = draft.branch_id;
        self.entity_type = draft.entity_type;
        self.document_name = draft.document_name;
        self.category = draft.category;
        self.mode = draft.mode;
        self.levels = draft.levels;
        self.updated_at = now;
    }

    pub fn key(&self) -> PolicyKey {
        PolicyKey::new(
            self.branch_id.clone(),
            self.entity_type,
            self.document_name.clone(),
        )
    }

    pub fn is_draft(&self) -> bool {
        self.status == PolicyStatus::Draft
    }

    pub fn is_locked(&self) -> bool {
        self.status == PolicyStatus::Locked
    }

    /// The version number the next activation will freeze
    pub fn next_version(&self) -> u32 {
        self.latest_version.map_or(1, |v| v + 1)
    }
}
