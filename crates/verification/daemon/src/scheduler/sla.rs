//! Periodic SLA sweep

use crate::config::SchedulerConfig;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use verification_engine::{SweepReport, VerificationService};
use verification_types::VerificationResult;

/// Runs the SLA monitor on a fixed interval until shutdown
pub struct SlaScheduler {
    config: SchedulerConfig,
    service: VerificationService,
    shutdown_rx: watch::Receiver<bool>,
    running: Arc<RwLock<bool>>,
    last_report: RwLock<Option<SweepReport>>,
}

impl SlaScheduler {
    pub fn new(
        config: SchedulerConfig,
        service: VerificationService,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            service,
            shutdown_rx,
            running: Arc::new(RwLock::new(false)),
            last_report: RwLock::new(None),
        })
    }

    /// One sweep. Stops early between requests once shutdown is signalled.
    pub async fn run_once(&self) -> VerificationResult<SweepReport> {
        let report = self.service.run_sla_sweep(Some(&self.shutdown_rx)).await?;

        if report.escalated > 0 {
            tracing::info!(
                scanned = report.scanned,
                escalated = report.escalated,
                skipped = report.skipped,
                "SLA sweep escalated requests"
            );
        }

        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    /// Sweep every `sla_sweep_interval_secs` until shutdown is signalled
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            tracing::info!("SLA scheduler disabled");
            return;
        }

        *self.running.write().await = true;
        tracing::info!(
            interval_secs = self.config.sla_sweep_interval_secs,
            "SLA scheduler started"
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut ticker = interval(Duration::from_secs(self.config.sla_sweep_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "SLA sweep failed");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }

            if !*self.running.read().await {
                break;
            }
        }

        *self.running.write().await = false;
        tracing::info!("SLA scheduler stopped");
    }

    /// Stop after the current tick
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn last_report(&self) -> Option<SweepReport> {
        self.last_report.read().await.clone()
    }
}
