//! Batch pipeline: validate, aggregate, and advance every entity in parallel.
//!
//! Entities share no state, so each one is a single rayon task. Output is
//! only assembled after every task finishes.

use chrono::{DateTime, Utc};
use engine_core::{
    build_daily_aggregates, process_entity, validate_events, validate_users, Checkpoint, DailyAggregate,
    EntityInput, EntityOutput, EntityProfile, Error, FeatureContext, FeatureRow, QualityReport, RawEvent,
    RawUser,
};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tracing::{info, warn};

/// Raw input for one pipeline run.
#[derive(Debug, Clone)]
pub struct FeatureBatch {
    pub events: Vec<RawEvent>,
    pub users: Vec<RawUser>,
    /// Rolling state to resume from, by entity
    pub checkpoints: HashMap<String, Checkpoint>,
    /// Entities known to have days before this batch
    pub history_expected: HashSet<String>,
    pub as_of: DateTime<Utc>,
}

impl FeatureBatch {
    pub fn new(events: Vec<RawEvent>, users: Vec<RawUser>, as_of: DateTime<Utc>) -> Self {
        Self {
            events,
            users,
            checkpoints: HashMap::new(),
            history_expected: HashSet::new(),
            as_of,
        }
    }
}

/// An entity that could not be advanced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity_id: String,
    pub code: Option<String>,
    pub error: String,
    /// Rebuilding from full history would fix it
    pub requires_full_recompute: bool,
}

impl EntityFailure {
    pub fn new(entity_id: impl Into<String>, error: &Error) -> Self {
        Self {
            entity_id: entity_id.into(),
            code: error.error_code().map(str::to_string),
            error: error.to_string(),
            requires_full_recompute: error.requires_full_recompute(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// Successfully processed entities, ordered by entity id
    pub entities: Vec<EntityOutput>,
    pub daily_aggregates: Vec<DailyAggregate>,
    pub quality: QualityReport,
    pub failures: Vec<EntityFailure>,
}

impl BatchOutput {
    pub fn rows(&self) -> impl Iterator<Item = &FeatureRow> {
        self.entities.iter().flat_map(|e| e.rows.iter())
    }

    pub fn checkpoints(&self) -> impl Iterator<Item = &Checkpoint> {
        self.entities.iter().filter_map(|e| e.checkpoint.as_ref())
    }

    pub fn row_count(&self) -> usize {
        self.entities.iter().map(|e| e.rows.len()).sum()
    }
}

/// Runs batches on a dedicated rayon pool, or the global one.
#[derive(Clone, Default)]
pub struct FeaturePipeline {
    pool: Option<Arc<ThreadPool>>,
}

impl FeaturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a dedicated pool with `threads` workers (0 = rayon default).
    pub fn with_threads(threads: usize) -> engine_core::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("feature-worker-{i}"))
            .build()
            .map_err(|e| Error::config(format!("Failed to build worker pool: {}", e)))?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    /// Runs the full pipeline over one batch. CPU-bound; call from a
    /// blocking context.
    pub fn run(&self, batch: FeatureBatch) -> BatchOutput {
        let start = Instant::now();
        let FeatureBatch {
            events,
            users,
            mut checkpoints,
            history_expected,
            as_of,
        } = batch;
        let ctx = FeatureContext::new(as_of);

        let events = validate_events(events);
        let users = validate_users(users);
        let quality = QualityReport::build(&events, &users, &ctx);
        record_validation(&quality);

        let daily_aggregates = build_daily_aggregates(&events);
        metrics().daily_aggregates_built.inc_by(daily_aggregates.len() as u64);

        let mut profiles: HashMap<String, EntityProfile> = users
            .iter()
            .filter_map(EntityProfile::from_validated)
            .map(|p| (p.entity_id.clone(), p))
            .collect();

        let mut by_entity: BTreeMap<String, Vec<DailyAggregate>> = BTreeMap::new();
        for agg in &daily_aggregates {
            by_entity.entry(agg.entity_id.clone()).or_default().push(agg.clone());
        }

        let inputs: Vec<EntityInput> = by_entity
            .into_iter()
            .map(|(entity_id, days)| EntityInput {
                profile: profiles.remove(&entity_id),
                checkpoint: checkpoints.remove(&entity_id),
                expects_history: history_expected.contains(&entity_id),
                entity_id,
                days,
            })
            .collect();

        let entity_count = inputs.len();
        metrics().entities_in_flight.set(entity_count as u64);

        let process = || -> Vec<(String, engine_core::Result<EntityOutput>)> {
            inputs
                .into_par_iter()
                .map(|input| (input.entity_id.clone(), process_entity(input, &ctx)))
                .collect()
        };
        let results = match &self.pool {
            Some(pool) => pool.install(process),
            None => process(),
        };
        metrics().entities_in_flight.set(0);

        let mut entities = Vec::with_capacity(entity_count);
        let mut failures = Vec::new();
        for (entity_id, result) in results {
            match result {
                Ok(output) => entities.push(output),
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Entity processing failed");
                    failures.push(EntityFailure::new(entity_id, &e));
                }
            }
        }

        let output = BatchOutput {
            entities,
            daily_aggregates,
            quality,
            failures,
        };

        metrics().entities_processed.inc_by(output.entities.len() as u64);
        metrics().entities_failed.inc_by(output.failures.len() as u64);
        metrics().feature_rows_emitted.inc_by(output.row_count() as u64);
        metrics().compute_latency_ms.observe_since(start);

        info!(
            entities = output.entities.len(),
            failed = output.failures.len(),
            rows = output.row_count(),
            latency_ms = %start.elapsed().as_millis(),
            "Feature batch computed"
        );

        output
    }
}

fn record_validation(quality: &QualityReport) {
    let m = metrics();
    m.events_received.inc_by(quality.events.total_rows);
    m.events_valid.inc_by(quality.events.valid_rows);
    m.events_invalid.inc_by(quality.events.invalid_rows);
    m.users_invalid.inc_by(quality.users.invalid_rows);
    m.purchases_without_amount.inc_by(quality.purchases_without_amount);
}
