//! Pirsch analytics engine
//!
//! Runs the tracker against ClickHouse:
//! - loads configuration from defaults, `config/default.toml` and `PIRSCH__*`
//! - creates the ClickHouse schema and checks the connection
//! - keeps a tracker running until shutdown, then flushes it

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{error, info};

use clickhouse_client::{ClickHouseClient, ClickHouseConfig, ClickHouseStore};
use pirsch_core::Store;
use telemetry::{health, init_tracing, metrics, TracingConfig};
use tracker::{Tracker, TrackerConfig, TrackerSettings};

/// Application configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    clickhouse: ClickHouseConfig,

    #[serde(default)]
    tracker: TrackerSettings,

    #[serde(default)]
    tracing: TracingConfig,

    /// Interval of the metrics log line, in seconds; 0 disables it
    #[serde(default = "default_metrics_interval_secs")]
    metrics_interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = load_config()?;
    init_tracing(&config.tracing.clone().with_env());

    info!("Starting pirsch v{}", env!("CARGO_PKG_VERSION"));

    let clickhouse = ClickHouseClient::new(config.clickhouse.clone());

    if let Err(e) = clickhouse_client::health::init_schema(&clickhouse).await {
        error!("Failed to initialize ClickHouse schema: {}", e);
    }

    if !check_health(&clickhouse).await {
        bail!("ClickHouse at {} is not reachable", config.clickhouse.url);
    }

    let store: Arc<dyn Store> = Arc::new(ClickHouseStore::new(clickhouse));
    let tracker = Tracker::new(store, TrackerConfig::from(config.tracker.clone()))
        .context("Invalid tracker configuration")?;
    health().tracker.set_healthy();
    info!(status = ?health().report().status, "Tracker running");

    run_until_shutdown(config.metrics_interval_secs).await;

    info!("Shutting down...");
    if let Err(e) = tracker.stop().await {
        error!("Failed to stop tracker: {}", e);
    }
    health().tracker.set_unhealthy("stopped");
    log_metrics();

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables, e.g. PIRSCH__CLICKHOUSE__URL
        .add_source(
            config::Environment::default()
                .prefix("PIRSCH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Check component health on startup.
async fn check_health(clickhouse: &ClickHouseClient) -> bool {
    let healthy = clickhouse_client::health::check_connection(clickhouse).await;
    if healthy {
        health().clickhouse.set_healthy();
        info!("ClickHouse connection: healthy");
    } else {
        health().clickhouse.set_unhealthy("Connection failed");
        error!("ClickHouse connection: unhealthy");
    }
    healthy
}

/// Logs metrics periodically until a shutdown signal arrives.
async fn run_until_shutdown(metrics_interval_secs: u64) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    if metrics_interval_secs == 0 {
        shutdown.await;
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(metrics_interval_secs));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => log_metrics(),
        }
    }
}

fn log_metrics() {
    let m = metrics().snapshot();
    info!(
        ready = health().is_ready(),
        hits_received = m.hits_received,
        hits_dropped_bot = m.hits_dropped_bot,
        sessions_created = m.sessions_created,
        page_views_saved = m.page_views_saved,
        sessions_saved = m.sessions_saved,
        events_saved = m.events_saved,
        records_dropped = m.records_dropped,
        store_errors = m.store_errors,
        cached_sessions = m.cached_sessions,
        queued_records = m.queued_records,
        batch_insert_latency_mean_ms = m.batch_insert_latency_mean_ms,
        "Metrics"
    );
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
