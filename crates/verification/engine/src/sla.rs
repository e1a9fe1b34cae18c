//! SLA monitoring and escalation
//!
//! A sweep flags every `Pending` request whose current level deadline has
//! passed as `Escalated` and hands one [`EscalationEvent`] per breach to the
//! configured sinks. Escalation is advisory: a sweep never approves or
//! rejects anything.

use crate::audit_log::AuditLog;
use crate::clock::Clock;
use crate::locks::AggregateLocks;
use crate::policy_store::PolicyStore;
use crate::state_machine;
use crate::storage::{RequestCommit, Storage};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use verification_types::{
    AuditAction, AuditEntry, EscalationEvent, RequestState, VerificationError,
    VerificationRequest, VerificationResult,
};

/// Actor recorded on escalation audit entries
pub const SLA_MONITOR_ACTOR: &str = "sla-monitor";

// ── Escalation sinks ─────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Escalation sink closed")]
    Closed,

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Receives escalation events. Delivery is the sink's concern; a failure
/// is logged and never undoes the escalation.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn notify(&self, event: &EscalationEvent) -> Result<(), SinkError>;
}

/// Fans events out to in-process subscribers (e.g. an SSE stream)
#[derive(Debug, Clone)]
pub struct BroadcastEscalationSink {
    tx: broadcast::Sender<EscalationEvent>,
}

impl BroadcastEscalationSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn from_sender(tx: broadcast::Sender<EscalationEvent>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscalationEvent> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<EscalationEvent> {
        self.tx.clone()
    }
}

#[async_trait]
impl EscalationSink for BroadcastEscalationSink {
    async fn notify(&self, event: &EscalationEvent) -> Result<(), SinkError> {
        // No subscribers is not a failure; nobody is listening yet.
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(request_id = %event.request_id, "No escalation subscribers");
        }
        Ok(())
    }
}

/// Writes every escalation to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEscalationSink;

#[async_trait]
impl EscalationSink for TracingEscalationSink {
    async fn notify(&self, event: &EscalationEvent) -> Result<(), SinkError> {
        tracing::warn!(
            request_id = %event.request_id,
            level = event.level_index,
            awaiting_role = %event.awaiting_role,
            overdue_secs = event.overdue_by_secs,
            "{}",
            event.summary()
        );
        Ok(())
    }
}

// ── Sweep ────────────────────────────────────────────────────────────

/// Counters from one sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Open requests examined
    pub scanned: usize,
    /// Requests moved `Pending → Escalated`
    pub escalated: usize,
    /// Overdue candidates left alone because a concurrent writer got there first
    pub skipped: usize,
    /// The sweep stopped early on shutdown
    pub interrupted: bool,
}

#[derive(Clone)]
pub struct SlaMonitor {
    storage: Arc<dyn Storage>,
    policies: PolicyStore,
    audit: AuditLog,
    locks: AggregateLocks,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn EscalationSink>>,
}

impl SlaMonitor {
    pub fn new(
        storage: Arc<dyn Storage>,
        policies: PolicyStore,
        audit: AuditLog,
        locks: AggregateLocks,
        clock: Arc<dyn Clock>,
        sinks: Vec<Arc<dyn EscalationSink>>,
    ) -> Self {
        Self {
            storage,
            policies,
            audit,
            locks,
            clock,
            sinks,
        }
    }

    /// Scan open requests once and escalate every new breach.
    ///
    /// Checks `shutdown` between requests; an interrupted sweep is safe to
    /// resume on the next tick.
    pub async fn sweep(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> VerificationResult<SweepReport> {
        let now = self.clock.now();
        let candidates = self.storage.list_open_requests().await?;
        let mut report = SweepReport::default();

        for candidate in candidates {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                tracing::info!(scanned = report.scanned, "SLA sweep interrupted by shutdown");
                report.interrupted = true;
                break;
            }
            report.scanned += 1;

            if candidate.state() != RequestState::Pending || candidate.overdue_by(now).is_none() {
                continue;
            }

            match self.escalate_one(&candidate, now).await {
                Ok(Some(event)) => {
                    report.escalated += 1;
                    self.publish(&event).await;
                }
                Ok(None) => report.skipped += 1,
                Err(VerificationError::ConcurrentModification(reason)) => {
                    tracing::warn!(
                        request_id = %candidate.id(),
                        reason = %reason,
                        "Escalation lost a write race"
                    );
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let pruned = self.locks.prune();
        tracing::debug!(
            scanned = report.scanned,
            escalated = report.escalated,
            skipped = report.skipped,
            pruned_locks = pruned,
            "SLA sweep finished"
        );
        Ok(report)
    }

    /// Re-read under the request lock and escalate if still due
    async fn escalate_one(
        &self,
        candidate: &VerificationRequest,
        now: chrono::DateTime<chrono::Utc>,
    ) -> VerificationResult<Option<EscalationEvent>> {
        let _guard = self.locks.lock_request(candidate.id()).await;

        let Some(mut request) = self.storage.get_request(candidate.id()).await? else {
            return Ok(None);
        };
        let version = self.policies.get_version(request.policy_version_id()).await?;

        let before = request.clone();
        let Some(event) = state_machine::escalate(&mut request, &version, now) else {
            return Ok(None);
        };

        request.bump_revision();
        let entry = AuditEntry::new(
            now,
            SLA_MONITOR_ACTOR,
            AuditAction::RequestEscalated,
            request.id().as_str(),
        )
        .with_before(&before)
        .with_after(&request);
        self.audit
            .commit_request(RequestCommit::update(request.clone(), before.revision(), entry))
            .await?;

        tracing::info!(
            request_id = %request.id(),
            level = event.level_index,
            overdue_secs = event.overdue_by_secs,
            "Request escalated"
        );
        Ok(Some(event))
    }

    async fn publish(&self, event: &EscalationEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event).await {
                tracing::warn!(
                    request_id = %event.request_id,
                    error = %e,
                    "Escalation sink failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for SlaMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaMonitor")
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dedup::DecisionLedger;
    use crate::storage::{InMemoryStorage, RequestRepository};
    use crate::workflow::{SubmitCommand, WorkflowEngine};
    use chrono::Duration;
    use std::sync::Mutex;
    use verification_types::{
        DocumentRef, EntityType, LevelSpec, PolicyDraft, Role, SubjectType, VerificationMode,
    };

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<EscalationEvent>>,
    }

    #[async_trait]
    impl EscalationSink for RecordingSink {
        async fn notify(&self, event: &EscalationEvent) -> Result<(), SinkError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl EscalationSink for FailingSink {
        async fn notify(&self, _event: &EscalationEvent) -> Result<(), SinkError> {
            Err(SinkError::Delivery("smtp down".into()))
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        engine: WorkflowEngine,
        monitor: SlaMonitor,
        audit: AuditLog,
        storage: Arc<InMemoryStorage>,
    }

    async fn fixture(sinks: Vec<Arc<dyn EscalationSink>>) -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(ManualClock::starting_now());
        let locks = AggregateLocks::new();
        let audit = AuditLog::new(storage.clone());
        let policies = PolicyStore::new(storage.clone(), audit.clone(), locks.clone(), clock.clone());
        let engine = WorkflowEngine::new(
            storage.clone(),
            policies.clone(),
            audit.clone(),
            locks.clone(),
            clock.clone(),
            Arc::new(DecisionLedger::default()),
        );
        let monitor = SlaMonitor::new(
            storage.clone(),
            policies.clone(),
            audit.clone(),
            locks,
            clock.clone(),
            sinks,
        );

        let draft = PolicyDraft::new("br-1", EntityType::Employee, "Contract", VerificationMode::Manual)
            .with_level(LevelSpec::new(Role::HrManager, 24, true));
        let policy = policies.save_draft(draft, "admin-1").await.unwrap();
        policies.activate(&policy.id, "admin-1").await.unwrap();

        Fixture {
            clock,
            engine,
            monitor,
            audit,
            storage,
        }
    }

    fn submit() -> SubmitCommand {
        SubmitCommand::new(
            DocumentRef::new("emp-7", "contract"),
            "br-1",
            EntityType::Employee,
            "Contract",
        )
    }

    #[tokio::test]
    async fn test_sweep_before_deadline_is_noop() {
        let f = fixture(vec![]).await;
        f.engine.submit(submit()).await.unwrap();
        f.clock.advance(Duration::hours(23));

        let report = f.monitor.sweep(None).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.escalated, 0);
    }

    #[tokio::test]
    async fn test_breach_raises_one_event_and_audit_entry() {
        let sink = Arc::new(RecordingSink::default());
        let f = fixture(vec![sink.clone()]).await;
        let req = f.engine.submit(submit()).await.unwrap();
        f.clock.advance(Duration::hours(26));

        let report = f.monitor.sweep(None).await.unwrap();
        assert_eq!(report.escalated, 1);

        let events = sink.events.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].request_id, *req.id());
        assert_eq!(events[0].overdue_by(), Duration::hours(2));
        assert_eq!(events[0].awaiting_role, Role::HrManager);

        let entries = f.audit.query(SubjectType::Request, req.id().as_str()).await.unwrap();
        assert_eq!(
            entries.last().map(|e| e.action),
            Some(AuditAction::RequestEscalated)
        );
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_escalation() {
        let f = fixture(vec![Arc::new(FailingSink)]).await;
        let req = f.engine.submit(submit()).await.unwrap();
        f.clock.advance(Duration::hours(25));

        let report = f.monitor.sweep(None).await.unwrap();
        assert_eq!(report.escalated, 1);
        let stored = f.storage.get_request(req.id()).await.unwrap().unwrap();
        assert_eq!(stored.state(), RequestState::Escalated);
    }

    #[tokio::test]
    async fn test_audit_outage_leaves_request_pending() {
        let sink = Arc::new(RecordingSink::default());
        let f = fixture(vec![sink.clone()]).await;
        let req = f.engine.submit(submit()).await.unwrap();
        f.clock.advance(Duration::hours(25));

        f.storage.set_audit_unavailable(true);
        assert!(f.monitor.sweep(None).await.is_err());
        let stored = f.storage.get_request(req.id()).await.unwrap().unwrap();
        assert_eq!(stored.state(), RequestState::Pending);
        assert!(sink.events.lock().unwrap().is_empty());

        f.storage.set_audit_unavailable(false);
        let report = f.monitor.sweep(None).await.unwrap();
        assert_eq!(report.escalated, 1);
        let escalations = f
            .audit
            .query(SubjectType::Request, req.id().as_str())
            .await
            .unwrap()
            .iter()
            .filter(|e| e.action == AuditAction::RequestEscalated)
            .count();
        assert_eq!(escalations, 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sweep() {
        let f = fixture(vec![]).await;
        f.engine.submit(submit()).await.unwrap();
        f.clock.advance(Duration::hours(25));

        let (tx, rx) = watch::channel(true);
        let report = f.monitor.sweep(Some(&rx)).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.escalated, 0);

        tx.send(false).unwrap();
        let report = f.monitor.sweep(Some(&rx)).await.unwrap();
        assert_eq!(report.escalated, 1);
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscribers() {
        let broadcast = BroadcastEscalationSink::new(8);
        let mut rx = broadcast.subscribe();
        let f = fixture(vec![Arc::new(broadcast.clone())]).await;
        f.engine.submit(submit()).await.unwrap();
        f.clock.advance(Duration::hours(25));

        f.monitor.sweep(None).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.level_index, 0);
    }
}
