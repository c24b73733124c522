//! Market-data feeder daemon entry point.

use anyhow::Result;
use clap::Parser;
use feedr_registry::{FeedRegistry, FeederSupervisor};
use tracing::info;

/// Multi-venue market-data feeder
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via FEEDR_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS crypto provider must be installed before any WS connection.
    feedr_ws::init_crypto();

    let args = Args::parse();
    feedr_telemetry::init_logging()?;

    info!("Starting feedr v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > FEEDR_CONFIG env var > default.
    let config_path = args
        .config
        .or_else(|| std::env::var("FEEDR_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = feedr_daemon::AppConfig::load(&config_path)?;

    let registry = FeedRegistry::new();
    let supervisor = FeederSupervisor::new(config.supervisor_config())?;

    supervisor.start_all(&registry).await;
    if registry.is_empty() {
        anyhow::bail!("No feeders started");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    supervisor.stop_all(&registry, config.shutdown_timeout()).await;
    Ok(())
}
