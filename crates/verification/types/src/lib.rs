//! Verification Domain Types
//!
//! Documents attached to student, employee and parent records pass through
//! zero, one or several approval levels before they count as verified.
//! This crate holds the data model; the engine crate drives it.
//!
//! # Key Concepts
//!
//! - **Policy**: the editable rule set for one document type in one branch.
//!   Mutable only while it is a `Draft`.
//! - **PolicyVersion**: an immutable snapshot of a policy's levels, frozen
//!   on activation and bound permanently to every request created under it.
//! - **LevelSpec**: one approval step: a role, an SLA in hours, and
//!   whether that role may reject.
//! - **VerificationRequest**: one document's journey through its bound
//!   version's levels.
//! - **AuditEntry**: a write-once record of a policy or request mutation.
//! - **EscalationEvent**: an advisory notice that a level's SLA passed.
//!
//! # Invariants
//!
//! 1. A saved policy's level count always fits its mode
//!    (`None` 0, `Manual` 1, `Multi` 2–3).
//! 2. A version's mode and levels never change after it is frozen.
//! 3. A request's bound version never changes, and its current level
//!    only moves forward until it terminates.

#![deny(unsafe_code)]

mod audit;
mod errors;
mod escalation;
mod ids;
mod policy;
mod request;
mod role;
mod version;

pub use audit::*;
pub use errors::*;
pub use escalation::*;
pub use ids::*;
pub use policy::*;
pub use request::*;
pub use role::*;
pub use version::*;
