//! Audit entries: write-once records of every policy and workflow mutation

use crate::{VerificationError, VerificationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What kind of aggregate an entry describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectType {
    Policy,
    Request,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Policy => "Policy",
            SubjectType::Request => "Request",
        }
    }
}

impl std::fmt::Display for SubjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "policy" => Ok(SubjectType::Policy),
            "request" => Ok(SubjectType::Request),
            other => Err(VerificationError::Validation(format!(
                "unknown subject type: {}",
                other
            ))),
        }
    }
}

/// The mutation an entry records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PolicyDraftSaved,
    PolicyActivated,
    PolicyUnlocked,
    RequestSubmitted,
    RequestAutoApproved,
    DecisionRecorded,
    RequestEscalated,
}

impl AuditAction {
    /// Actions that reopen or override something must carry a reason
    pub fn requires_reason(&self) -> bool {
        matches!(self, AuditAction::PolicyUnlocked)
    }

    pub fn subject_type(&self) -> SubjectType {
        match self {
            AuditAction::PolicyDraftSaved
            | AuditAction::PolicyActivated
            | AuditAction::PolicyUnlocked => SubjectType::Policy,
            AuditAction::RequestSubmitted
            | AuditAction::RequestAutoApproved
            | AuditAction::DecisionRecorded
            | AuditAction::RequestEscalated => SubjectType::Request,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PolicyDraftSaved => "policy_draft_saved",
            AuditAction::PolicyActivated => "policy_activated",
            AuditAction::PolicyUnlocked => "policy_unlocked",
            AuditAction::RequestSubmitted => "request_submitted",
            AuditAction::RequestAutoApproved => "request_auto_approved",
            AuditAction::DecisionRecorded => "decision_recorded",
            AuditAction::RequestEscalated => "request_escalated",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record. `sequence` is assigned by the log on append.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    #[serde(default)]
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_snapshot: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_snapshot: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        actor: impl Into<String>,
        action: AuditAction,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            sequence: 0,
            timestamp,
            actor: actor.into(),
            subject_type: action.subject_type(),
            subject_id: subject_id.into(),
            action,
            before_snapshot: None,
            after_snapshot: None,
            reason: None,
        }
    }

    /// Attach the state before the mutation. Snapshots that fail to
    /// serialize are recorded as `null` rather than dropping the entry.
    pub fn with_before<T: Serialize>(mut self, before: &T) -> Self {
        self.before_snapshot = Some(serde_json::to_value(before).unwrap_or_default());
        self
    }

    pub fn with_after<T: Serialize>(mut self, after: &T) -> Self {
        self.after_snapshot = Some(serde_json::to_value(after).unwrap_or_default());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Reject entries that would leave a reason-bearing action unexplained
    pub fn validate(&self) -> VerificationResult<()> {
        if self.action.requires_reason()
            && self.reason.as_deref().map_or(true, |r| r.trim().is_empty())
        {
            return Err(VerificationError::ReasonRequired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_type_follows_action() {
        let entry = AuditEntry::new(Utc::now(), "admin-1", AuditAction::PolicyActivated, "pol-1");
        assert_eq!(entry.subject_type, SubjectType::Policy);

        let entry = AuditEntry::new(Utc::now(), "sla-monitor", AuditAction::RequestEscalated, "req-1");
        assert_eq!(entry.subject_type, SubjectType::Request);
    }

    #[test]
    fn test_unlock_requires_reason() {
        let entry = AuditEntry::new(Utc::now(), "admin-1", AuditAction::PolicyUnlocked, "pol-1");
        assert!(matches!(entry.validate(), Err(VerificationError::ReasonRequired)));

        let blank = entry.clone().with_reason("   ");
        assert!(matches!(blank.validate(), Err(VerificationError::ReasonRequired)));

        let ok = entry.with_reason("Add compliance level");
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_snapshots_serialize() {
        let entry = AuditEntry::new(Utc::now(), "u", AuditAction::PolicyDraftSaved, "pol-1")
            .with_after(&serde_json::json!({"mode": "Manual"}));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "policy_draft_saved");
        assert_eq!(json["subjectType"], "Policy");
        assert_eq!(json["afterSnapshot"]["mode"], "Manual");
        assert!(json.get("beforeSnapshot").is_none());
    }

    #[test]
    fn test_subject_type_parse() {
        assert_eq!("request".parse::<SubjectType>().unwrap(), SubjectType::Request);
        assert_eq!("Policy".parse::<SubjectType>().unwrap(), SubjectType::Policy);
        assert!("branch".parse::<SubjectType>().is_err());
    }
}
