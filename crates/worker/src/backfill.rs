//! Backfill worker for feature recomputation.
//!
//! Recomputes feature rows and daily aggregates for a date range from the
//! full raw history of each entity active in that range.

use chrono::{DateTime, NaiveDate, Utc};
use clickhouse_client::{DateRange, Warehouse};
use engine_core::{Checkpoint, Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, info, warn};

use crate::job::{compute, record_outcome, JobConfig, JobMode, JobSummary};
use crate::lease::EntityLeases;
use crate::pipeline::{FeatureBatch, FeaturePipeline};
use crate::sink::{persist, PendingWrites};

/// Worker that recomputes features over a date range.
pub struct BackfillWorker {
    warehouse: Arc<dyn Warehouse>,
    pipeline: FeaturePipeline,
    leases: Arc<EntityLeases>,
    config: JobConfig,
}

impl BackfillWorker {
    pub fn new(warehouse: Arc<dyn Warehouse>, pipeline: FeaturePipeline, config: JobConfig) -> Self {
        Self {
            warehouse,
            pipeline,
            leases: EntityLeases::new(),
            config,
        }
    }

    pub fn with_leases(mut self, leases: Arc<EntityLeases>) -> Self {
        self.leases = leases;
        self
    }

    /// Run backfill for every entity with events between `start` and `end`.
    pub async fn run(&self, start: NaiveDate, end: NaiveDate, as_of: DateTime<Utc>) -> Result<JobSummary> {
        if start > end {
            return Err(Error::validation(format!(
                "Backfill start {} is after end {}",
                start, end
            )));
        }

        info!(start = %start, end = %end, "Running backfill");
        let started = Instant::now();
        metrics().job_runs.inc();

        let result = self.backfill(start, end, as_of, started).await;
        if let Err(e) = &result {
            warn!(error = %e, "Backfill failed");
        }
        record_outcome(&result);
        result
    }

    async fn backfill(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        as_of: DateTime<Utc>,
        started: Instant,
    ) -> Result<JobSummary> {
        let range = DateRange::between(start, end);
        let mut summary = JobSummary::new(JobMode::Backfill, as_of, Some(start), end);

        let in_range = self.warehouse.fetch_events(range, None).await?;
        let entity_ids: BTreeSet<String> = in_range
            .iter()
            .map(|e| e.entity_id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        drop(in_range);

        let lease = self.leases.claim(entity_ids);
        summary.entities_leased_elsewhere = lease.rejected().len();
        let ids = lease.claimed();
        if ids.is_empty() {
            return Ok(summary.finish(started));
        }

        let history = self
            .warehouse
            .fetch_events(DateRange::until(end), Some(ids))
            .await?;
        summary.events_read = history.len();
        let users = self.warehouse.fetch_users(ids).await?;
        let output = compute(&self.pipeline, FeatureBatch::new(history, users, as_of)).await?;
        summary.entities_processed = output.entities.len();
        summary.full_recomputes = output.entities.len();

        let mut writes = PendingWrites::default();
        writes.add(&output);
        writes.rows.retain(|row| range.contains(row.feature_date));
        writes.aggregates.retain(|agg| range.contains(agg.date));

        // A stored checkpoint past the range stays; it already covers these days.
        let stored = self.warehouse.load_checkpoints(ids).await?;
        writes.checkpoints.retain(|checkpoint| {
            match stored
                .get(&checkpoint.entity_id)
                .map(|json| Checkpoint::from_json(&checkpoint.entity_id, json))
            {
                Some(Ok(existing)) => existing.last_date_processed <= end,
                _ => true,
            }
        });

        let counts = persist(self.warehouse.as_ref(), self.config.retry, &writes).await?;
        summary.aggregates_upserted = counts.aggregates;
        summary.rows_upserted = counts.rows;
        summary.checkpoints_written = counts.checkpoints;
        summary.failures = output.failures;

        let summary = summary.finish(started);
        debug!(summary = ?summary, "Backfill complete");
        Ok(summary)
    }
}
