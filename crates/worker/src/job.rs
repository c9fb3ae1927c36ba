//! Incremental feature job.
//!
//! Each run reads the recent raw events, resumes every touched entity from
//! its checkpoint, and writes new feature rows before moving the checkpoints
//! forward. Entities whose checkpoint is missing or unusable are rebuilt from
//! their full history in the same run.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use clickhouse_client::{DateRange, Warehouse};
use engine_core::{Checkpoint, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use telemetry::{health, metrics};
use tracing::{info, warn};

use crate::lease::EntityLeases;
use crate::pipeline::{BatchOutput, EntityFailure, FeatureBatch, FeaturePipeline};
use crate::sink::{persist, PendingWrites, RetryPolicy};

#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Days of raw events re-read on each run, ending at the last complete day
    pub lookback_days: i64,
    pub retry: RetryPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            lookback_days: 3,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Incremental,
    Backfill,
}

/// What a job run did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub run_id: String,
    pub mode: JobMode,
    pub as_of: DateTime<Utc>,
    pub window_start: Option<NaiveDate>,
    pub window_end: NaiveDate,
    pub events_read: usize,
    /// Events on days the entity's checkpoint already covers
    pub stale_events_skipped: usize,
    /// Entities skipped because another run holds them
    pub entities_leased_elsewhere: usize,
    pub entities_processed: usize,
    pub full_recomputes: usize,
    pub aggregates_upserted: usize,
    pub rows_upserted: usize,
    pub checkpoints_written: usize,
    pub failures: Vec<EntityFailure>,
    pub duration_ms: u64,
}

impl JobSummary {
    pub(crate) fn new(mode: JobMode, as_of: DateTime<Utc>, window_start: Option<NaiveDate>, window_end: NaiveDate) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            mode,
            as_of,
            window_start,
            window_end,
            events_read: 0,
            stale_events_skipped: 0,
            entities_leased_elsewhere: 0,
            entities_processed: 0,
            full_recomputes: 0,
            aggregates_upserted: 0,
            rows_upserted: 0,
            checkpoints_written: 0,
            failures: Vec::new(),
            duration_ms: 0,
        }
    }

    pub(crate) fn finish(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }
}

/// The last UTC day that can no longer receive events as of `as_of`.
pub fn last_complete_day(as_of: DateTime<Utc>) -> NaiveDate {
    as_of.date_naive() - Duration::days(1)
}

/// Runs the pipeline on the blocking pool.
pub(crate) async fn compute(pipeline: &FeaturePipeline, batch: FeatureBatch) -> Result<BatchOutput> {
    let pipeline = pipeline.clone();
    tokio::task::spawn_blocking(move || pipeline.run(batch))
        .await
        .map_err(|e| Error::internal(format!("Pipeline task failed: {}", e)))
}

/// Records a job outcome in metrics and health.
pub(crate) fn record_outcome(result: &Result<JobSummary>) {
    match result {
        Ok(summary) => {
            metrics().last_job_rows.set(summary.rows_upserted as u64);
            health().feature_job.set_healthy();
        }
        Err(e) => {
            metrics().job_failures.inc();
            health().feature_job.set_unhealthy(e.to_string());
        }
    }
}

/// Incremental feature job over a warehouse.
pub struct FeatureJob {
    warehouse: Arc<dyn Warehouse>,
    pipeline: FeaturePipeline,
    leases: Arc<EntityLeases>,
    config: JobConfig,
}

impl FeatureJob {
    pub fn new(warehouse: Arc<dyn Warehouse>, pipeline: FeaturePipeline, config: JobConfig) -> Self {
        Self {
            warehouse,
            pipeline,
            leases: EntityLeases::new(),
            config,
        }
    }

    /// Shares leases with other jobs touching the same checkpoints.
    pub fn with_leases(mut self, leases: Arc<EntityLeases>) -> Self {
        self.leases = leases;
        self
    }

    pub fn leases(&self) -> &Arc<EntityLeases> {
        &self.leases
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Advances every entity with new complete days up to `as_of`.
    pub async fn run_incremental(&self, as_of: DateTime<Utc>) -> Result<JobSummary> {
        let started = Instant::now();
        metrics().job_runs.inc();

        let result = self.incremental(as_of, started).await;
        match &result {
            Ok(summary) => info!(
                run_id = %summary.run_id,
                entities = summary.entities_processed,
                rebuilt = summary.full_recomputes,
                rows = summary.rows_upserted,
                failures = summary.failures.len(),
                duration_ms = summary.duration_ms,
                "Incremental feature job finished"
            ),
            Err(e) => warn!(error = %e, "Incremental feature job failed"),
        }
        record_outcome(&result);
        result
    }

    async fn incremental(&self, as_of: DateTime<Utc>, started: Instant) -> Result<JobSummary> {
        let end = last_complete_day(as_of);
        let start = end - Duration::days(self.config.lookback_days.max(1) - 1);
        let mut summary = JobSummary::new(JobMode::Incremental, as_of, Some(start), end);

        let mut events = self
            .warehouse
            .fetch_events(DateRange::between(start, end), None)
            .await?;
        summary.events_read = events.len();

        let entity_ids: BTreeSet<String> = events
            .iter()
            .map(|e| e.entity_id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        let lease = self.leases.claim(entity_ids);
        summary.entities_leased_elsewhere = lease.rejected().len();
        if !lease.rejected().is_empty() {
            warn!(count = lease.rejected().len(), "Entities held by another run, skipping");
        }
        if lease.claimed().is_empty() {
            return Ok(summary.finish(started));
        }

        // Resume state; anything undecodable is rebuilt from scratch.
        let mut checkpoints: HashMap<String, Checkpoint> = HashMap::new();
        let mut rebuild: BTreeSet<String> = BTreeSet::new();
        for (entity_id, json) in self.warehouse.load_checkpoints(lease.claimed()).await? {
            match Checkpoint::from_json(&entity_id, &json) {
                Ok(checkpoint) => {
                    checkpoints.insert(entity_id, checkpoint);
                }
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Discarding unusable checkpoint");
                    rebuild.insert(entity_id);
                }
            }
        }

        // Checkpoints older than the look-back need the days in between.
        let lagging: Vec<String> = checkpoints
            .values()
            .filter(|cp| cp.last_date_processed < start - Duration::days(1))
            .map(|cp| cp.entity_id.clone())
            .collect();
        if let Some(catch_up_from) = lagging
            .iter()
            .filter_map(|id| checkpoints.get(id))
            .map(|cp| cp.last_date_processed + Duration::days(1))
            .min()
        {
            info!(count = lagging.len(), from = %catch_up_from, "Catching up lagging checkpoints");
            let missed = self
                .warehouse
                .fetch_events(
                    DateRange::between(catch_up_from, start - Duration::days(1)),
                    Some(lagging.as_slice()),
                )
                .await?;
            summary.events_read += missed.len();
            events.extend(missed);
        }

        let unseen: Vec<String> = lease
            .claimed()
            .iter()
            .filter(|id| !checkpoints.contains_key(*id) && !rebuild.contains(*id))
            .cloned()
            .collect();
        let history_expected = self.warehouse.entities_active_before(&unseen, start).await?;

        let claimed: HashSet<&str> = lease.claimed().iter().map(String::as_str).collect();
        let mut batch_events = Vec::with_capacity(events.len());
        for event in events {
            let id = event.entity_id.trim();
            if !claimed.contains(id) || rebuild.contains(id) {
                continue;
            }
            if let (Some(checkpoint), Some(date)) = (checkpoints.get(id), event.partition_date()) {
                if date <= checkpoint.last_date_processed {
                    summary.stale_events_skipped += 1;
                    continue;
                }
            }
            batch_events.push(event);
        }

        let batch_entities: Vec<String> = claimed
            .iter()
            .filter(|id| !rebuild.contains(**id))
            .map(|id| id.to_string())
            .collect();
        let users = self.warehouse.fetch_users(&batch_entities).await?;

        let output = compute(
            &self.pipeline,
            FeatureBatch {
                events: batch_events,
                users,
                checkpoints,
                history_expected,
                as_of,
            },
        )
        .await?;

        let mut writes = PendingWrites::default();
        writes.add(&output);
        summary.entities_processed += output.entities.len();
        for failure in output.failures {
            if failure.requires_full_recompute {
                rebuild.insert(failure.entity_id);
            } else {
                summary.failures.push(failure);
            }
        }

        if !rebuild.is_empty() {
            let ids: Vec<String> = rebuild.into_iter().collect();
            metrics().full_recompute_fallbacks.inc_by(ids.len() as u64);
            summary.full_recomputes = ids.len();
            info!(count = ids.len(), "Rebuilding entities from full history");

            let history = self
                .warehouse
                .fetch_events(DateRange::until(end), Some(ids.as_slice()))
                .await?;
            let users = self.warehouse.fetch_users(&ids).await?;
            let rebuilt = compute(&self.pipeline, FeatureBatch::new(history, users, as_of)).await?;

            writes.add(&rebuilt);
            summary.entities_processed += rebuilt.entities.len();
            summary.failures.extend(rebuilt.failures);
        }

        let counts = persist(self.warehouse.as_ref(), self.config.retry, &writes).await?;
        summary.aggregates_upserted = counts.aggregates;
        summary.rows_upserted = counts.rows;
        summary.checkpoints_written = counts.checkpoints;

        Ok(summary.finish(started))
    }
}
