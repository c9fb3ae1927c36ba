//! Storage seams between the engine and the warehouse.
//!
//! Workers and the API only see these traits, so tests can swap the
//! warehouse for an in-memory implementation.

use crate::client::ClickHouseClient;
use crate::query::DateRange;
use crate::{insert, query};
use async_trait::async_trait;
use chrono::NaiveDate;
use engine_core::{Checkpoint, DailyAggregate, FeatureRow, QualityReport, RawEvent, RawUser, Result};
use std::collections::{HashMap, HashSet};

/// Source of raw records.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Raw events whose partition date falls in `range`.
    async fn fetch_events(&self, range: DateRange, entity_ids: Option<&[String]>) -> Result<Vec<RawEvent>>;

    async fn fetch_users(&self, entity_ids: &[String]) -> Result<Vec<RawUser>>;

    /// Which of `entity_ids` have raw events dated before `date`.
    async fn entities_active_before(&self, entity_ids: &[String], date: NaiveDate) -> Result<HashSet<String>>;
}

/// Destination for computed rows. Writes are upserts by key.
#[async_trait]
pub trait FeatureSink: Send + Sync {
    async fn upsert_features(&self, rows: &[FeatureRow]) -> Result<usize>;

    async fn upsert_daily_aggregates(&self, aggregates: &[DailyAggregate]) -> Result<usize>;

    /// Latest rows for an entity, newest first.
    async fn fetch_features(&self, entity_id: &str, limit: u32) -> Result<Vec<FeatureRow>>;

    async fn store_quality_report(&self, report: &QualityReport) -> Result<()>;
}

/// Per-entity rolling state between incremental runs.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stored checkpoint JSON by entity. Entities without one are absent.
    async fn load_checkpoints(&self, entity_ids: &[String]) -> Result<HashMap<String, String>>;

    async fn write_checkpoints(&self, checkpoints: &[Checkpoint]) -> Result<usize>;
}

/// Everything a feature job needs from the warehouse.
pub trait Warehouse: EventStore + FeatureSink + CheckpointStore {}

impl<T: EventStore + FeatureSink + CheckpointStore> Warehouse for T {}

#[async_trait]
impl EventStore for ClickHouseClient {
    async fn fetch_events(&self, range: DateRange, entity_ids: Option<&[String]>) -> Result<Vec<RawEvent>> {
        query::fetch_events(self, range, entity_ids).await
    }

    async fn fetch_users(&self, entity_ids: &[String]) -> Result<Vec<RawUser>> {
        query::fetch_users(self, entity_ids).await
    }

    async fn entities_active_before(&self, entity_ids: &[String], date: NaiveDate) -> Result<HashSet<String>> {
        query::entities_active_before(self, entity_ids, date).await
    }
}

#[async_trait]
impl FeatureSink for ClickHouseClient {
    async fn upsert_features(&self, rows: &[FeatureRow]) -> Result<usize> {
        insert::upsert_features(self, rows).await
    }

    async fn upsert_daily_aggregates(&self, aggregates: &[DailyAggregate]) -> Result<usize> {
        insert::upsert_daily_aggregates(self, aggregates).await
    }

    async fn fetch_features(&self, entity_id: &str, limit: u32) -> Result<Vec<FeatureRow>> {
        query::fetch_features(self, entity_id, limit).await
    }

    async fn store_quality_report(&self, report: &QualityReport) -> Result<()> {
        insert::insert_quality_report(self, report).await
    }
}

#[async_trait]
impl CheckpointStore for ClickHouseClient {
    async fn load_checkpoints(&self, entity_ids: &[String]) -> Result<HashMap<String, String>> {
        query::load_checkpoints(self, entity_ids).await
    }

    async fn write_checkpoints(&self, checkpoints: &[Checkpoint]) -> Result<usize> {
        insert::write_checkpoints(self, checkpoints).await
    }
}
