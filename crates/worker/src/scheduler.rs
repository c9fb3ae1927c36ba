//! Worker scheduler for background tasks.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use clickhouse_client::{check_connection, insert_metrics, ClickHouseClient};
use telemetry::metrics;

use crate::job::FeatureJob;
use crate::notifications::Notification;
use crate::quality::QualityMonitor;

/// Worker scheduler configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Incremental feature job interval
    pub job_interval: Duration,
    /// Quality monitor interval
    pub quality_interval: Duration,
    /// Metrics flush interval
    pub metrics_flush_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_interval: Duration::from_secs(3600),         // 1 hour
            quality_interval: Duration::from_secs(900),      // 15 minutes
            metrics_flush_interval: Duration::from_secs(60), // 1 minute
        }
    }
}

/// Background worker scheduler.
pub struct WorkerScheduler {
    config: WorkerConfig,
    clickhouse: Arc<ClickHouseClient>,
    job: Arc<FeatureJob>,
    monitor: Arc<QualityMonitor>,
}

impl WorkerScheduler {
    pub fn new(
        config: WorkerConfig,
        clickhouse: Arc<ClickHouseClient>,
        job: Arc<FeatureJob>,
        monitor: Arc<QualityMonitor>,
    ) -> Self {
        Self {
            config,
            clickhouse,
            job,
            monitor,
        }
    }

    /// Starts all background workers.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_feature_job().await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_quality_monitor().await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_metrics_flush().await;
        }));

        info!("Background workers started");
        handles
    }

    async fn run_feature_job(&self) {
        let mut ticker = interval(self.config.job_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if let Err(e) = self.job.run_incremental(Utc::now()).await {
                error!("Feature job error: {}", e);
                let alert = Notification::JobFailed {
                    mode: "incremental".to_string(),
                    error: e.to_string(),
                };
                if let Err(e) = self.monitor.notifier().send(alert).await {
                    error!("Failed to send job alert: {}", e);
                }
            }
        }
    }

    async fn run_quality_monitor(&self) {
        let mut ticker = interval(self.config.quality_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match self.monitor.run(Utc::now()).await {
                Ok(report) => {
                    if let Err(e) = self.monitor.notifier().check_and_alert(&report).await {
                        error!("Notification check error: {}", e);
                    }
                }
                Err(e) => error!("Quality monitor error: {}", e),
            }
        }
    }

    async fn run_metrics_flush(&self) {
        let mut ticker = interval(self.config.metrics_flush_interval);

        loop {
            ticker.tick().await;

            check_connection(&self.clickhouse).await;

            let snapshot = metrics().snapshot();
            if let Err(e) = insert_metrics(&self.clickhouse, snapshot).await {
                error!("Failed to flush metrics: {}", e);
            }
        }
    }
}
