//! Configuration for verifyd

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// SLA scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Workflow engine configuration
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            enable_cors: true,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// SLA scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between SLA sweeps
    #[serde(default = "default_sweep_interval")]
    pub sla_sweep_interval_secs: u64,

    /// Run the periodic sweep at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sla_sweep_interval_secs: default_sweep_interval(),
            enabled: true,
        }
    }
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Window in which an identical decision is treated as a retry
    #[serde(default = "default_dedup_window")]
    pub decision_dedup_window_secs: u64,

    /// Buffered escalation events per stream subscriber
    #[serde(default = "default_escalation_buffer")]
    pub escalation_buffer: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            decision_dedup_window_secs: default_dedup_window(),
            escalation_buffer: default_escalation_buffer(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_dedup_window() -> u64 {
    verification_engine::DEFAULT_DEDUP_WINDOW_SECS
}

fn default_escalation_buffer() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `VERIFYD_*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // VERIFYD_SCHEDULER__SLA_SWEEP_INTERVAL_SECS=30
        builder = builder.add_source(
            config::Environment::with_prefix("VERIFYD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert!(matches!(config.storage, StorageConfig::Memory));
    }

    #[test]
    fn test_scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.sla_sweep_interval_secs, 60);
        assert!(config.enabled);
    }

    #[test]
    fn test_workflow_defaults() {
        let config = WorkflowConfig::default();
        assert_eq!(config.decision_dedup_window_secs, 300);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.scheduler.sla_sweep_interval_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_postgres_storage_deserializes() {
        let json = serde_json::json!({
            "type": "postgres",
            "url": "postgres://localhost/verify"
        });
        let storage: StorageConfig = serde_json::from_value(json).unwrap();
        match storage {
            StorageConfig::Postgres {
                max_connections,
                connect_timeout_secs,
                ..
            } => {
                assert_eq!(max_connections, 10);
                assert_eq!(connect_timeout_secs, 5);
            }
            StorageConfig::Memory => panic!("expected postgres"),
        }
    }
}
