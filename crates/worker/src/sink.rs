//! Writing pipeline output to the warehouse with bounded retry.

use crate::pipeline::BatchOutput;
use clickhouse_client::{CheckpointStore, FeatureSink};
use engine_core::{Checkpoint, DailyAggregate, FeatureRow, Result};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Linear backoff retry for sink writes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds or retries are exhausted.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.backoff * attempt;
                    warn!(
                        what = what,
                        attempt = attempt,
                        backoff_ms = %backoff.as_millis(),
                        error = %e,
                        "Retrying warehouse write"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Output collected from one or more pipeline runs, waiting to be written.
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    pub aggregates: Vec<DailyAggregate>,
    pub rows: Vec<FeatureRow>,
    pub checkpoints: Vec<Checkpoint>,
}

impl PendingWrites {
    /// Adds the output of every successfully processed entity. Aggregates of
    /// failed entities are left out so tables stay consistent per entity.
    pub fn add(&mut self, output: &BatchOutput) {
        let succeeded: HashSet<&str> = output.entities.iter().map(|e| e.entity_id.as_str()).collect();
        self.aggregates.extend(
            output
                .daily_aggregates
                .iter()
                .filter(|a| succeeded.contains(a.entity_id.as_str()))
                .cloned(),
        );
        self.rows.extend(output.rows().cloned());
        self.checkpoints.extend(output.checkpoints().cloned());
    }
}

/// Counts of rows written by [`persist`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistCounts {
    pub aggregates: usize,
    pub rows: usize,
    pub checkpoints: usize,
}

/// Upserts aggregates and feature rows, then writes checkpoints.
///
/// Checkpoints go last: if any row upsert fails, no checkpoint moves forward
/// and the next run recomputes the same days.
pub async fn persist<S>(sink: &S, policy: RetryPolicy, writes: &PendingWrites) -> Result<PersistCounts>
where
    S: FeatureSink + CheckpointStore + ?Sized,
{
    let PendingWrites {
        aggregates,
        rows,
        checkpoints,
    } = writes;
    let aggregates = policy
        .run("daily_aggregates", || sink.upsert_daily_aggregates(aggregates))
        .await?;
    let rows = policy.run("user_features", || sink.upsert_features(rows)).await?;
    let checkpoints = policy
        .run("feature_checkpoints", || sink.write_checkpoints(checkpoints))
        .await?;

    info!(
        aggregates = aggregates,
        rows = rows,
        checkpoints = checkpoints,
        "Persisted feature output"
    );

    Ok(PersistCounts {
        aggregates,
        rows,
        checkpoints,
    })
}
