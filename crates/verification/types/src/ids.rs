//! Identifiers for policies, policy versions, requests and documents

use crate::{EntityType, VerificationError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ── Policy Identifier ────────────────────────────────────────────────

/// Unique identifier for a verification policy
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(pub String);

impl PolicyId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Request Identifier ───────────────────────────────────────────────

/// Unique identifier for a verification request
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Version Reference ────────────────────────────────────────────────

/// Points at one frozen version of one policy.
///
/// This is the `policyVersionId` a request is bound to at submission.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRef {
    pub policy_id: PolicyId,
    pub version_id: u32,
}

impl VersionRef {
    pub fn new(policy_id: PolicyId, version_id: u32) -> Self {
        Self {
            policy_id,
            version_id,
        }
    }
}

impl std::fmt::Display for VersionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.policy_id, self.version_id)
    }
}

// ── Policy Key ───────────────────────────────────────────────────────

/// The scope a policy governs: one document type for one entity type
/// within one branch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyKey {
    pub branch_id: String,
    pub entity_type: EntityType,
    pub document_name: String,
}

impl PolicyKey {
    pub fn new(
        branch_id: impl Into<String>,
        entity_type: EntityType,
        document_name: impl Into<String>,
    ) -> Self {
        Self {
            branch_id: branch_id.into(),
            entity_type,
            document_name: document_name.into(),
        }
    }
}

impl std::fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.branch_id, self.entity_type, self.document_name
        )
    }
}

// ── Document Reference ───────────────────────────────────────────────

/// The document instance being verified: the owning entity plus the
/// document slot on that entity (e.g. `student-42` / `birth-certificate`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub owner_id: String,
    pub slot: String,
}

impl DocumentRef {
    pub fn new(owner_id: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            slot: slot.into(),
        }
    }
}

impl std::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.slot)
    }
}

impl FromStr for DocumentRef {
    type Err = VerificationError;

    /// Parses the `owner/slot` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, slot)) if !owner.trim().is_empty() && !slot.trim().is_empty() => {
                Ok(Self::new(owner.trim(), slot.trim()))
            }
            _ => Err(VerificationError::InvalidDocumentRef(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_version_ref_display() {
        let v = VersionRef::new(PolicyId::new("pol-1"), 3);
        assert_eq!(v.to_string(), "pol-1@v3");
    }

    #[test]
    fn test_document_ref_parse() {
        let doc: DocumentRef = "student-42/birth-certificate".parse().unwrap();
        assert_eq!(doc.owner_id, "student-42");
        assert_eq!(doc.slot, "birth-certificate");
        assert_eq!(doc.to_string(), "student-42/birth-certificate");

        assert!("no-slash".parse::<DocumentRef>().is_err());
        assert!("/slot".parse::<DocumentRef>().is_err());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = PolicyId::new("pol-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"pol-7\"");
    }
}
