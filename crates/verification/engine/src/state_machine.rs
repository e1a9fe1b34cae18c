//! Request transition rules
//!
//! Pure functions over a request and its bound version. Nothing here reads
//! storage, takes locks or looks at the clock; callers pass `now` in.
//!
//! ```text
//!   submit ──► Pending ──(SLA passes)──► Escalated
//!                │  ▲                        │
//!                │  └──── approve (not last) ┘
//!                ├── approve at last level ──► Approved
//!                └── reject (canReject) ─────► Rejected
//! ```

use chrono::{DateTime, Utc};
use verification_types::{
    Actor, Decision, DocumentRef, EscalationEvent, LevelDecision, LevelSpec, PolicyVersion,
    RequestState, VerificationError, VerificationRequest, VerificationResult,
};

/// A decision as submitted by a caller
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionCommand {
    pub actor: Actor,
    pub decision: Decision,
    pub comment: Option<String>,
    /// The level the caller believes is current. A mismatch is `StaleLevel`.
    pub expected_level: Option<usize>,
}

impl DecisionCommand {
    pub fn new(actor: Actor, decision: Decision) -> Self {
        Self {
            actor,
            decision,
            comment: None,
            expected_level: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn at_level(mut self, level_index: usize) -> Self {
        self.expected_level = Some(level_index);
        self
    }
}

/// What a committed decision did to the request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Rejected,
    Approved,
    Advanced {
        level_index: usize,
        deadline: DateTime<Utc>,
    },
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Rejected => f.write_str("rejected"),
            Outcome::Approved => f.write_str("approved"),
            Outcome::Advanced { level_index, .. } => write!(f, "advanced to level {}", level_index),
        }
    }
}

/// Build the initial request for a document bound to `version`
pub fn start_request(
    version: &PolicyVersion,
    document_ref: DocumentRef,
    submitted_by: &str,
    now: DateTime<Utc>,
) -> VerificationResult<VerificationRequest> {
    if version.auto_verifies() {
        return Ok(VerificationRequest::auto_approved(
            document_ref,
            version.reference(),
            submitted_by,
            now,
        ));
    }

    Ok(VerificationRequest::pending(
        document_ref,
        version.reference(),
        deadline_for(version, 0, now)?,
        submitted_by,
        now,
    ))
}

/// Check that `command` may be applied to `request` at its current level.
/// Returns the level index the decision applies to.
pub fn authorize(
    request: &VerificationRequest,
    version: &PolicyVersion,
    command: &DecisionCommand,
) -> VerificationResult<usize> {
    if request.is_terminal() {
        return Err(VerificationError::RequestTerminal(request.id().clone()));
    }
    let current = request.current_level_index().ok_or_else(|| {
        VerificationError::InvalidTransition(format!("open request {} has no level", request.id()))
    })?;

    if let Some(expected) = command.expected_level {
        if expected != current {
            return Err(VerificationError::StaleLevel {
                requested: expected,
                current,
            });
        }
    }

    let level = level_at(version, current)?;
    if !command.actor.holds(level.role) {
        // The actor's level already went by: they lost a race, not a role check.
        if command.expected_level.is_none() {
            if let Some(passed) = version.levels()[..current]
                .iter()
                .rposition(|l| command.actor.holds(l.role))
            {
                return Err(VerificationError::StaleLevel {
                    requested: passed,
                    current,
                });
            }
        }
        return Err(VerificationError::RoleMismatch {
            expected: level.role,
            actual: command.actor.role,
        });
    }

    if command.decision == Decision::Reject && !level.can_reject {
        return Err(VerificationError::RejectNotAllowed {
            level_index: current,
        });
    }

    Ok(current)
}

/// Authorize and apply one decision, mutating `request` in place
pub fn apply_decision(
    request: &mut VerificationRequest,
    version: &PolicyVersion,
    command: &DecisionCommand,
    now: DateTime<Utc>,
) -> VerificationResult<Outcome> {
    let level_index = authorize(request, version, command)?;
    let is_last = Some(level_index) == version.last_level_index();
    let next_deadline = match command.decision {
        Decision::Approve if !is_last => Some(deadline_for(version, level_index + 1, now)?),
        _ => None,
    };

    request.push_decision(LevelDecision {
        level_index,
        actor: command.actor.clone(),
        decision: command.decision,
        timestamp: now,
        comment: command.comment.clone(),
    })?;

    match (command.decision, next_deadline) {
        (Decision::Reject, _) => {
            request.finish(RequestState::Rejected, now)?;
            Ok(Outcome::Rejected)
        }
        (Decision::Approve, Some(deadline)) => {
            let next = level_index + 1;
            request.advance_to(next, deadline, now)?;
            Ok(Outcome::Advanced {
                level_index: next,
                deadline,
            })
        }
        (Decision::Approve, None) => {
            request.finish(RequestState::Approved, now)?;
            Ok(Outcome::Approved)
        }
    }
}

/// Flag an SLA breach on a `Pending` request whose current deadline has
/// passed. Returns `None` when there is nothing to escalate.
pub fn escalate(
    request: &mut VerificationRequest,
    version: &PolicyVersion,
    now: DateTime<Utc>,
) -> Option<EscalationEvent> {
    if request.state() != RequestState::Pending {
        return None;
    }
    let overdue_by = request.overdue_by(now)?;
    let level_index = request.current_level_index()?;
    let deadline = request.current_deadline()?;
    let awaiting_role = version.level(level_index)?.role;

    if !request.mark_escalated(now) {
        return None;
    }
    Some(EscalationEvent {
        request_id: request.id().clone(),
        level_index,
        overdue_by_secs: overdue_by.num_seconds(),
        deadline,
        detected_at: now,
        policy_version_id: request.policy_version_id().clone(),
        awaiting_role,
    })
}

/// When level `index` is due if it opens at `now`. A deadline past the
/// representable range is `InvalidSla`, never a panic.
fn deadline_for(
    version: &PolicyVersion,
    index: usize,
    now: DateTime<Utc>,
) -> VerificationResult<DateTime<Utc>> {
    now.checked_add_signed(level_at(version, index)?.sla())
        .ok_or(VerificationError::InvalidSla { level_index: index })
}

fn level_at(version: &PolicyVersion, index: usize) -> VerificationResult<&LevelSpec> {
    version.level(index).ok_or_else(|| {
        VerificationError::InvalidTransition(format!(
            "version {} has no level {}",
            version.reference(),
            index
        ))
    })
}
