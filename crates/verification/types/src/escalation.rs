//! SLA breach notifications
//!
//! Escalation is advisory. An event tells a human that a level is overdue;
//! it never approves or rejects anything.

use crate::{RequestId, Role, VersionRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raised once per breach, when a request moves `Pending → Escalated`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationEvent {
    pub request_id: RequestId,
    pub level_index: usize,
    /// Seconds past the level deadline at detection time
    pub overdue_by_secs: i64,
    pub deadline: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub policy_version_id: VersionRef,
    /// The role expected to decide at the overdue level
    pub awaiting_role: Role,
}

impl EscalationEvent {
    pub fn overdue_by(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.overdue_by_secs)
    }

    /// Short human-readable summary for notification channels
    pub fn summary(&self) -> String {
        format!(
            "Request {} overdue at level {} ({}) by {}m",
            self.request_id.short(),
            self.level_index,
            self.awaiting_role,
            self.overdue_by_secs / 60
        )
    }
}
