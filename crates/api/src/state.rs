//! Application state shared across handlers.

use clickhouse_client::Warehouse;
use std::sync::Arc;
use worker::{BackfillWorker, FeatureJob, FeaturePipeline};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Warehouse (ClickHouse in production, in-memory in tests)
    pub warehouse: Arc<dyn Warehouse>,
    /// Pipeline for stateless compute requests
    pub pipeline: FeaturePipeline,
    pub job: Arc<FeatureJob>,
    pub backfill: Arc<BackfillWorker>,
}

impl AppState {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        pipeline: FeaturePipeline,
        job: Arc<FeatureJob>,
        backfill: Arc<BackfillWorker>,
    ) -> Self {
        Self {
            warehouse,
            pipeline,
            job,
            backfill,
        }
    }

    /// Job and backfill over one warehouse, sharing entity leases.
    pub fn with_warehouse(warehouse: Arc<dyn Warehouse>, pipeline: FeaturePipeline, config: worker::JobConfig) -> Self {
        let job = FeatureJob::new(warehouse.clone(), pipeline.clone(), config.clone());
        let backfill = BackfillWorker::new(warehouse.clone(), pipeline.clone(), config)
            .with_leases(job.leases().clone());
        Self::new(warehouse, pipeline, Arc::new(job), Arc::new(backfill))
    }
}
