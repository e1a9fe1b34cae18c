//! verifyd library
//!
//! Hosts the verification engine behind a REST API:
//! - policy drafting, activation and unlock
//! - request submission and per-level decisions
//! - the periodic SLA sweep and an escalation event stream
//! - the audit trail

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult};
pub use scheduler::SlaScheduler;
pub use server::Server;
