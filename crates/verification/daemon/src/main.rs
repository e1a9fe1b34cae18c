//! verifyd - document verification workflow service

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verification_daemon::{DaemonConfig, DaemonError, DaemonResult, Server};

/// verifyd CLI
#[derive(Parser)]
#[command(name = "verifyd")]
#[command(about = "Document verification policies and approval workflows", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VERIFYD_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides the config file)
    #[arg(short, long, env = "VERIFYD_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "VERIFYD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "VERIFYD_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }

    // RUST_LOG wins over the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        sweep_interval_secs = config.scheduler.sla_sweep_interval_secs,
        "Starting verifyd"
    );

    let server = Server::new(config).await?;
    server.run().await
}
