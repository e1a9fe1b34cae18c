//! Application state for API handlers

use crate::scheduler::SlaScheduler;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use verification_engine::VerificationService;
use verification_types::EscalationEvent;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Policy store, workflow engine, SLA monitor and audit log
    pub service: VerificationService,

    /// SLA scheduler handle
    pub scheduler: Arc<SlaScheduler>,

    /// Escalation broadcast channel
    pub escalation_tx: broadcast::Sender<EscalationEvent>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,

    /// Graceful shutdown signal sender
    pub shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        service: VerificationService,
        scheduler: Arc<SlaScheduler>,
        escalation_tx: broadcast::Sender<EscalationEvent>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            service,
            scheduler,
            escalation_tx,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
            shutdown_tx,
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
