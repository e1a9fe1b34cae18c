//! Verification requests: one document's journey through its bound version
//!
//! A request is bound to a [`VersionRef`] at creation and that binding has
//! no setter. The current level only ever moves forward; termination
//! (`Approved` / `Rejected`) clears it and freezes the request.

use crate::{Actor, DocumentRef, RequestId, VerificationError, VerificationResult, VersionRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Request State ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    /// Waiting for a decision at the current level
    Pending,
    /// The current level's SLA has passed; still waiting for a decision
    Escalated,
    Approved,
    Rejected,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Approved | RequestState::Rejected)
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "Pending",
            RequestState::Escalated => "Escalated",
            RequestState::Approved => "Approved",
            RequestState::Rejected => "Rejected",
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Decisions ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Approve,
    Reject,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Approve => f.write_str("Approve"),
            Decision::Reject => f.write_str("Reject"),
        }
    }
}

/// A committed decision at one level
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelDecision {
    pub level_index: usize,
    pub actor: Actor,
    pub decision: Decision,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ── Verification Request ─────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    id: RequestId,
    document_ref: DocumentRef,
    policy_version_id: VersionRef,
    /// `-1` on the wire once the request has terminated
    #[serde(with = "level_index")]
    current_level_index: Option<usize>,
    state: RequestState,
    level_deadlines: Vec<DateTime<Utc>>,
    history: Vec<LevelDecision>,
    submitted_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    escalated_at: Option<DateTime<Utc>>,
    revision: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl VerificationRequest {
    /// A request waiting at level 0 until `first_deadline`
    pub fn pending(
        document_ref: DocumentRef,
        policy_version_id: VersionRef,
        first_deadline: DateTime<Utc>,
        submitted_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            document_ref,
            policy_version_id,
            current_level_index: Some(0),
            state: RequestState::Pending,
            level_deadlines: vec![first_deadline],
            history: Vec::new(),
            submitted_by: submitted_by.into(),
            escalated_at: None,
            revision: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// A request verified on submission (policy mode `None`)
    pub fn auto_approved(
        document_ref: DocumentRef,
        policy_version_id: VersionRef,
        submitted_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            document_ref,
            policy_version_id,
            current_level_index: None,
            state: RequestState::Approved,
            level_deadlines: Vec::new(),
            history: Vec::new(),
            submitted_by: submitted_by.into(),
            escalated_at: None,
            revision: 0,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn document_ref(&self) -> &DocumentRef {
        &self.document_ref
    }

    pub fn policy_version_id(&self) -> &VersionRef {
        &self.policy_version_id
    }

    pub fn current_level_index(&self) -> Option<usize> {
        self.current_level_index
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn level_deadlines(&self) -> &[DateTime<Utc>] {
        &self.level_deadlines
    }

    pub fn history(&self) -> &[LevelDecision] {
        &self.history
    }

    pub fn submitted_by(&self) -> &str {
        &self.submitted_by
    }

    pub fn escalated_at(&self) -> Option<DateTime<Utc>> {
        self.escalated_at
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Deadline of the level currently awaiting a decision
    pub fn current_deadline(&self) -> Option<DateTime<Utc>> {
        self.current_level_index
            .and_then(|i| self.level_deadlines.get(i).copied())
    }

    /// How far past the current deadline `now` is, if at all
    pub fn overdue_by(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        if !self.is_open() {
            return None;
        }
        self.current_deadline()
            .filter(|deadline| *deadline < now)
            .map(|deadline| now - deadline)
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Append a committed decision to the history
    pub fn push_decision(&mut self, decision: LevelDecision) -> VerificationResult<()> {
        self.ensure_open()?;
        self.updated_at = decision.timestamp;
        self.history.push(decision);
        Ok(())
    }

    /// Move to `next` level. Only the level directly after the current
    /// one is accepted.
    pub fn advance_to(
        &mut self,
        next: usize,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> VerificationResult<()> {
        self.ensure_open()?;
        let current = self.current_level_index.ok_or_else(|| {
            VerificationError::InvalidTransition("open request has no current level".into())
        })?;
        if next != current + 1 {
            return Err(VerificationError::InvalidTransition(format!(
                "cannot move from level {} to level {}",
                current, next
            )));
        }

        self.current_level_index = Some(next);
        self.level_deadlines.truncate(next);
        self.level_deadlines.push(deadline);
        self.state = RequestState::Pending;
        self.escalated_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Terminate as `Approved` or `Rejected`
    pub fn finish(&mut self, outcome: RequestState, now: DateTime<Utc>) -> VerificationResult<()> {
        self.ensure_open()?;
        if !outcome.is_terminal() {
            return Err(VerificationError::InvalidTransition(format!(
                "{} is not a terminal state",
                outcome
            )));
        }
        self.state = outcome;
        self.current_level_index = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Flag an SLA breach. Returns `false` when the request was not
    /// `Pending` (already escalated or terminal).
    pub fn mark_escalated(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != RequestState::Pending {
            return false;
        }
        self.state = RequestState::Escalated;
        self.escalated_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Advance the optimistic-concurrency revision before a write
    pub fn bump_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn ensure_open(&self) -> VerificationResult<()> {
        if self.is_terminal() {
            return Err(VerificationError::RequestTerminal(self.id.clone()));
        }
        Ok(())
    }
}

/// `Option<usize>` ↔ signed index with `-1` for "no current level"
mod level_index {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(index) => serializer.serialize_i64(*index as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        if raw < 0 {
            Ok(None)
        } else {
            usize::try_from(raw)
                .map(Some)
                .map_err(serde::de::Error::custom)
        }
    }
}
