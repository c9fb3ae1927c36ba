//! Feature Engine
//!
//! Incremental rolling-metrics and feature engineering service:
//! - Raw event and user validation with data quality reporting
//! - Daily aggregation and trailing 7/30-day windows per entity
//! - Checkpoint-based incremental runs with full-recompute fallback
//! - ClickHouse feature store and HTTP API for compute, jobs, and lookup

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use api::{router, AppState};
use clickhouse_client::{check_connection, init_schema, ClickHouseClient, ClickHouseConfig, Warehouse};
use telemetry::init_tracing_from_env;
use worker::{
    BackfillWorker, FeatureJob, FeaturePipeline, JobConfig, NotificationWorker, QualityMonitor, RetryPolicy,
    WorkerConfig, WorkerScheduler,
};

/// Application configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    #[serde(default)]
    clickhouse: ClickHouseConfig,

    #[serde(default)]
    worker: WorkerSettings,

    /// Webhook receiving alert text, log-only when unset
    #[serde(default)]
    alert_webhook_url: Option<String>,
}

/// Job scheduling and write policy.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct WorkerSettings {
    job_interval_secs: u64,
    quality_interval_secs: u64,
    metrics_flush_interval_secs: u64,
    lookback_days: i64,
    sink_max_retries: u32,
    sink_backoff_ms: u64,
    /// Rayon workers for entity processing (0 = one per core)
    compute_threads: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let worker = WorkerConfig::default();
        let job = JobConfig::default();
        Self {
            job_interval_secs: worker.job_interval.as_secs(),
            quality_interval_secs: worker.quality_interval.as_secs(),
            metrics_flush_interval_secs: worker.metrics_flush_interval.as_secs(),
            lookback_days: job.lookback_days,
            sink_max_retries: job.retry.max_retries,
            sink_backoff_ms: job.retry.backoff.as_millis() as u64,
            compute_threads: 0,
        }
    }
}

impl WorkerSettings {
    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            job_interval: Duration::from_secs(self.job_interval_secs.max(1)),
            quality_interval: Duration::from_secs(self.quality_interval_secs.max(1)),
            metrics_flush_interval: Duration::from_secs(self.metrics_flush_interval_secs.max(1)),
        }
    }

    fn job_config(&self) -> JobConfig {
        JobConfig {
            lookback_days: self.lookback_days.max(1),
            retry: RetryPolicy {
                max_retries: self.sink_max_retries,
                backoff: Duration::from_millis(self.sink_backoff_ms),
            },
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            clickhouse: ClickHouseConfig::default(),
            worker: WorkerSettings::default(),
            alert_webhook_url: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting Feature Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    info!(
        host = %config.host,
        port = config.port,
        clickhouse = %config.clickhouse.url,
        database = %config.clickhouse.database,
        "Configuration loaded"
    );

    let clickhouse = Arc::new(ClickHouseClient::new(config.clickhouse.clone()));

    if let Err(e) = init_schema(&clickhouse).await {
        error!("Failed to initialize ClickHouse schema: {}", e);
        // Continue anyway - schema might already exist
    }

    if check_connection(&clickhouse).await {
        info!("ClickHouse connection: healthy");
    } else {
        error!("ClickHouse connection: unhealthy");
    }

    let pipeline = FeaturePipeline::with_threads(config.worker.compute_threads)
        .context("Failed to create compute pool")?;
    let warehouse: Arc<dyn Warehouse> = clickhouse.clone();
    let state = AppState::with_warehouse(warehouse.clone(), pipeline, config.worker.job_config());

    let notifier = Arc::new(NotificationWorker::from_webhook(config.alert_webhook_url.clone()));
    let monitor = Arc::new(QualityMonitor::new(warehouse, notifier));
    let scheduler = Arc::new(WorkerScheduler::new(
        config.worker.worker_config(),
        clickhouse.clone(),
        state.job.clone(),
        monitor,
    ));
    let worker_handles = scheduler.start();

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    for handle in worker_handles {
        handle.abort();
    }

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
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("FEATURES")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Manual overrides for nested ClickHouse config
    // The config crate's nested parsing doesn't work reliably with underscored field names
    if let Ok(url) = std::env::var("FEATURES_CLICKHOUSE_URL") {
        config.clickhouse.url = url;
    }
    if let Ok(database) = std::env::var("FEATURES_CLICKHOUSE_DATABASE") {
        config.clickhouse.database = database;
    }
    if let Ok(username) = std::env::var("FEATURES_CLICKHOUSE_USERNAME") {
        config.clickhouse.username = Some(username);
    }
    if let Ok(password) = std::env::var("FEATURES_CLICKHOUSE_PASSWORD") {
        config.clickhouse.password = Some(password);
    }

    if let Ok(url) = std::env::var("FEATURES_ALERT_WEBHOOK_URL") {
        config.alert_webhook_url = Some(url);
    }

    Ok(config)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install terminate handler: {}", e);
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
