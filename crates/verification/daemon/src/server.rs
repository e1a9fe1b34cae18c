//! Server setup and lifecycle management

use crate::api::rest::{create_router, AppState};
use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::SlaScheduler;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use verification_engine::{
    BroadcastEscalationSink, InMemoryStorage, Storage, TracingEscalationSink, VerificationService,
};

/// verifyd server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
}

impl Server {
    /// Open the configured storage backend and wire up the service
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let storage = open_storage(&config.storage).await?;
        Ok(Self::with_storage(config, storage))
    }

    /// Wire up the service over an already opened backend
    pub fn with_storage(config: DaemonConfig, storage: Arc<dyn Storage>) -> Self {
        let escalations = BroadcastEscalationSink::new(config.workflow.escalation_buffer.max(1));
        let escalation_tx = escalations.sender();

        let service = VerificationService::builder(storage)
            .dedup_window(Duration::from_secs(
                config.workflow.decision_dedup_window_secs,
            ))
            .sink(Arc::new(escalations))
            .sink(Arc::new(TracingEscalationSink))
            .build();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = SlaScheduler::new(config.scheduler.clone(), service.clone(), shutdown_rx);

        let state = AppState::new(service, scheduler, escalation_tx, shutdown_tx);
        Self { config, state }
    }

    /// The HTTP application, without binding a socket
    pub fn router(&self) -> Router {
        create_router(self.state.clone(), &self.config.server)
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = self.router();

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "verifyd listening");

        let scheduler = self.state.scheduler.clone();
        let scheduler_handle = tokio::spawn(scheduler.start());

        let shutdown_tx = self.state.shutdown_tx.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(true);
            })
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("verifyd shutting down");

        self.state.scheduler.stop().await;
        if let Err(e) = scheduler_handle.await {
            tracing::warn!(error = %e, "SLA scheduler task ended abnormally");
        }

        Ok(())
    }
}

async fn open_storage(config: &StorageConfig) -> DaemonResult<Arc<dyn Storage>> {
    match config {
        StorageConfig::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(InMemoryStorage::new()))
        }
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            tracing::info!(max_connections, "Connecting to PostgreSQL");
            let storage = verification_engine::PostgresStorage::new(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await?;
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => Err(DaemonError::Config(
            "postgres storage requires verifyd built with the `postgres` feature".to_string(),
        )),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
