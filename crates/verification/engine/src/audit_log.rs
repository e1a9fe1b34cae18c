//! Append-only audit trail
//!
//! There is no update or delete path. Every policy mutation and workflow
//! transition commits together with its entry: if the entry cannot be
//! written, neither is the state change.

use crate::storage::{PolicyCommit, RequestCommit, Storage};
use std::sync::Arc;
use verification_types::{AuditEntry, SubjectType, VerificationResult};

#[derive(Clone)]
pub struct AuditLog {
    storage: Arc<dyn Storage>,
}

impl AuditLog {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Append an entry. Only fails on a malformed entry (a reason-bearing
    /// action without a reason) or when storage is unavailable.
    pub async fn record(&self, entry: AuditEntry) -> VerificationResult<AuditEntry> {
        entry.validate()?;
        let stored = self.storage.append_audit(entry).await?;
        Self::trace(&stored);
        Ok(stored)
    }

    /// Write a policy change and its entry atomically
    pub async fn commit_policy(&self, commit: PolicyCommit) -> VerificationResult<AuditEntry> {
        commit.audit.validate()?;
        let stored = self.storage.commit_policy(commit).await?;
        Self::trace(&stored);
        Ok(stored)
    }

    /// Write a request change and its entry atomically
    pub async fn commit_request(&self, commit: RequestCommit) -> VerificationResult<AuditEntry> {
        commit.audit.validate()?;
        let stored = self.storage.commit_request(commit).await?;
        Self::trace(&stored);
        Ok(stored)
    }

    fn trace(stored: &AuditEntry) {
        tracing::debug!(
            sequence = stored.sequence,
            action = %stored.action,
            subject_id = %stored.subject_id,
            "Audit entry recorded"
        );
    }

    /// Entries for one subject, oldest first
    pub async fn query(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> VerificationResult<Vec<AuditEntry>> {
        Ok(self.storage.query_audit(subject_type, subject_id).await?)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}
