//! Verification Engine
//!
//! Policy versioning and the multi-level approval workflow for document
//! verification.
//!
//! # Architecture
//!
//! [`VerificationService`] wires together components that share one
//! storage backend, one lock registry and one clock:
//!
//! - [`PolicyStore`]: drafts, activation into frozen versions, unlock
//! - [`WorkflowEngine`]: submission and per-level decisions
//! - [`SlaMonitor`]: periodic breach detection and escalation events
//! - [`AuditLog`]: append-only trail of every mutation
//!
//! Mutations of one policy or one request are serialized through
//! [`AggregateLocks`]; different aggregates never block each other.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use verification_engine::{InMemoryStorage, SubmitCommand, VerificationService};
//! use verification_types::*;
//!
//! # tokio_test_block_on(async {
//! let service = VerificationService::new(Arc::new(InMemoryStorage::new()));
//!
//! let draft = PolicyDraft::new("br-1", EntityType::Student, "Birth Certificate", VerificationMode::Manual)
//!     .with_level(LevelSpec::new(Role::Admin, 24, true));
//! let policy = service.policies().save_draft(draft, "admin-1").await.unwrap();
//! service.policies().activate(&policy.id, "admin-1").await.unwrap();
//!
//! let request = service
//!     .workflow()
//!     .submit(SubmitCommand::new(
//!         DocumentRef::new("student-42", "birth-certificate"),
//!         "br-1",
//!         EntityType::Student,
//!         "Birth Certificate",
//!     ))
//!     .await
//!     .unwrap();
//! assert_eq!(request.state(), RequestState::Pending);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]

pub mod audit_log;
pub mod clock;
pub mod dedup;
pub mod locks;
pub mod policy_store;
pub mod sla;
pub mod state_machine;
pub mod storage;
pub mod workflow;

pub use audit_log::AuditLog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::{DecisionLedger, PriorDecision, DEFAULT_DEDUP_WINDOW_SECS};
pub use locks::AggregateLocks;
pub use policy_store::PolicyStore;
pub use sla::{
    BroadcastEscalationSink, EscalationSink, SinkError, SlaMonitor, SweepReport,
    TracingEscalationSink,
};
pub use state_machine::{DecisionCommand, Outcome};
pub use storage::{InMemoryStorage, Storage};
#[cfg(feature = "postgres")]
pub use storage::PostgresStorage;
pub use workflow::{SubmitCommand, WorkflowEngine};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use verification_types::VerificationResult;

/// All engine components over one shared backend
#[derive(Clone, Debug)]
pub struct VerificationService {
    policies: PolicyStore,
    workflow: WorkflowEngine,
    sla: SlaMonitor,
    audit: AuditLog,
}

impl VerificationService {
    /// A service on the system clock with default settings and a logging sink
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::builder(storage).build()
    }

    pub fn builder(storage: Arc<dyn Storage>) -> VerificationServiceBuilder {
        VerificationServiceBuilder::new(storage)
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn workflow(&self) -> &WorkflowEngine {
        &self.workflow
    }

    pub fn sla(&self) -> &SlaMonitor {
        &self.sla
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// One SLA sweep followed by dedup housekeeping
    pub async fn run_sla_sweep(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> VerificationResult<SweepReport> {
        let report = self.sla.sweep(shutdown).await?;
        let purged = self.workflow.purge_expired_decisions();
        if purged > 0 {
            tracing::debug!(purged, "Expired decision dedup entries");
        }
        Ok(report)
    }
}

/// Builder for [`VerificationService`]
pub struct VerificationServiceBuilder {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    dedup_window: Duration,
    sinks: Vec<Arc<dyn EscalationSink>>,
}

impl VerificationServiceBuilder {
    fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            sinks: Vec::new(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Add an escalation sink. Without any, escalations are only logged.
    pub fn sink(mut self, sink: Arc<dyn EscalationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> VerificationService {
        let locks = AggregateLocks::new();
        let audit = AuditLog::new(self.storage.clone());
        let policies = PolicyStore::new(
            self.storage.clone(),
            audit.clone(),
            locks.clone(),
            self.clock.clone(),
        );
        let workflow = WorkflowEngine::new(
            self.storage.clone(),
            policies.clone(),
            audit.clone(),
            locks.clone(),
            self.clock.clone(),
            Arc::new(DecisionLedger::new(self.dedup_window)),
        );

        let mut sinks = self.sinks;
        if sinks.is_empty() {
            sinks.push(Arc::new(TracingEscalationSink));
        }
        let sla = SlaMonitor::new(
            self.storage,
            policies.clone(),
            audit.clone(),
            locks,
            self.clock,
            sinks,
        );

        VerificationService {
            policies,
            workflow,
            sla,
            audit,
        }
    }
}
