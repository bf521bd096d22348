use anyhow::{Context, Result};
use clap::Parser;
use overlay_throttle::config::Config;
use overlay_throttle::config_store::ConfigStore;
use overlay_throttle::lifecycle::Lifecycle;
use overlay_throttle::store::{RedisConnector, Topology};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Overlay service with a shared Redis rate limiter.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Overlay configuration file; overrides OVERLAY_CONFIG_PATH
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind; overrides BIND_HOST
    #[arg(long)]
    bind_host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load settings from environment")?;
    if let Some(path) = cli.config {
        config.config_path = path;
    }
    if let Some(host) = cli.bind_host {
        config.bind_host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("overlay_throttle={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting overlay service");

    let topology = Topology::select(&config).context("Invalid cache topology")?;
    tracing::info!(
        config_path = %config.config_path.display(),
        topology = topology.mode(),
        "Settings loaded"
    );

    let lifecycle = Lifecycle::new(
        ConfigStore::new(&config.config_path),
        topology,
        Arc::new(RedisConnector::new(config.redis_timeout())),
    );
    lifecycle.start().await.context("Startup failed")?;

    let port = lifecycle.config().read().await.port;
    let listener = match tokio::net::TcpListener::bind((config.bind_host.as_str(), port)).await {
        Ok(listener) => listener,
        Err(e) => {
            lifecycle.shutdown().await.ok();
            return Err(e).with_context(|| format!("Failed to bind {}:{}", config.bind_host, port));
        }
    };

    let signals = lifecycle
        .watch_signals()
        .context("Failed to install signal handlers")?;
    let served = lifecycle.serve(listener, config.shutdown_grace()).await;
    signals.abort();

    served.context("Server error")?;
    tracing::info!("Overlay service stopped");
    Ok(())
}
