//! Storage layer for the verification engine
//!
//! Persists policies, frozen versions, requests and the audit trail.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod traits;

pub use memory::InMemoryStorage;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStorage;
pub use traits::{
    AuditRepository, CommitRepository, PolicyCommit, PolicyRepository, PolicyVersionRepository,
    RequestCommit, RequestRepository, Storage, StorageResult,
};

use verification_types::{PolicyVersion, StorageError};

/// Metadata writes may not alter what a version froze
pub(crate) fn ensure_frozen_unchanged(
    stored: &PolicyVersion,
    version: &PolicyVersion,
) -> StorageResult<()> {
    if stored.mode() != version.mode()
        || stored.levels() != version.levels()
        || stored.activated_at() != version.activated_at()
    {
        return Err(StorageError::InvalidData(format!(
            "version {} is frozen",
            version.reference()
        )));
    }
    Ok(())
}
