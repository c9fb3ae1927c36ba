//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use clickhouse_client::{CheckpointStore, DateRange, EventStore, FeatureSink};
use engine_core::error::DbErrorCode;
use engine_core::{Checkpoint, DailyAggregate, Error, FeatureRow, QualityReport, RawEvent, RawUser, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

/// A raw event with the UTC day it was ingested on.
#[derive(Clone)]
struct StoredEvent {
    event: RawEvent,
    ingested_on: NaiveDate,
}

impl StoredEvent {
    /// Matches the `event_date` column: the event's UTC day, or the
    /// ingestion day when it has no timestamp.
    fn event_date(&self) -> NaiveDate {
        self.event.partition_date().unwrap_or(self.ingested_on)
    }
}

/// In-memory warehouse.
///
/// Implements the same store traits as `ClickHouseClient`, with upsert-by-key
/// semantics for features, aggregates, and checkpoints.
#[derive(Default)]
pub struct InMemoryWarehouse {
    events: Mutex<Vec<StoredEvent>>,
    users: Mutex<Vec<RawUser>>,
    features: Mutex<BTreeMap<(String, NaiveDate), FeatureRow>>,
    aggregates: Mutex<BTreeMap<(String, NaiveDate), DailyAggregate>>,
    checkpoints: Mutex<HashMap<String, String>>,
    reports: Mutex<Vec<QualityReport>>,
    /// Upcoming writes to fail
    failing_writes: AtomicU32,
    /// Fail checkpoint writes only
    fail_checkpoint_writes: Mutex<bool>,
    feature_upserts: AtomicU32,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_events(&self, events: impl IntoIterator<Item = RawEvent>) {
        self.insert_events_ingested_on(Utc::now().date_naive(), events);
    }

    /// Inserts events as if ingested on `day`.
    pub fn insert_events_ingested_on(&self, day: NaiveDate, events: impl IntoIterator<Item = RawEvent>) {
        self.events
            .lock()
            .extend(events.into_iter().map(|event| StoredEvent { event, ingested_on: day }));
    }

    pub fn insert_users(&self, users: impl IntoIterator<Item = RawUser>) {
        self.users.lock().extend(users);
    }

    /// Stores raw checkpoint JSON, valid or not.
    pub fn put_checkpoint_json(&self, entity_id: &str, json: &str) {
        self.checkpoints.lock().insert(entity_id.to_string(), json.to_string());
    }

    pub fn checkpoint(&self, entity_id: &str) -> Option<Checkpoint> {
        let json = self.checkpoints.lock().get(entity_id).cloned()?;
        Checkpoint::from_json(entity_id, &json).ok()
    }

    /// Stored feature rows for an entity, oldest first.
    pub fn features_for(&self, entity_id: &str) -> Vec<FeatureRow> {
        self.features
            .lock()
            .values()
            .filter(|row| row.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub fn feature_count(&self) -> usize {
        self.features.lock().len()
    }

    pub fn aggregate_count(&self) -> usize {
        self.aggregates.lock().len()
    }

    pub fn aggregate(&self, entity_id: &str, date: NaiveDate) -> Option<DailyAggregate> {
        self.aggregates.lock().get(&(entity_id.to_string(), date)).cloned()
    }

    pub fn quality_reports(&self) -> Vec<QualityReport> {
        self.reports.lock().clone()
    }

    /// Number of successful feature upsert calls.
    pub fn feature_upserts(&self) -> u32 {
        self.feature_upserts.load(Ordering::SeqCst)
    }

    /// Makes the next `n` writes fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_checkpoint_writes(&self, fail: bool) {
        *self.fail_checkpoint_writes.lock() = fail;
    }

    fn check_write(&self) -> Result<()> {
        let failed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::database(DbErrorCode::StoreFailed, "Mock write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryWarehouse {
    async fn fetch_events(&self, range: DateRange, entity_ids: Option<&[String]>) -> Result<Vec<RawEvent>> {
        let mut events: Vec<StoredEvent> = self
            .events
            .lock()
            .iter()
            .filter(|e| range.contains(e.event_date()))
            .filter(|e| entity_ids.map_or(true, |ids| ids.contains(&e.event.entity_id)))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            (&a.event.entity_id, a.event_date(), &a.event.event_id)
                .cmp(&(&b.event.entity_id, b.event_date(), &b.event.event_id))
        });
        Ok(events.into_iter().map(|e| e.event).collect())
    }

    async fn fetch_users(&self, entity_ids: &[String]) -> Result<Vec<RawUser>> {
        Ok(self
            .users
            .lock()
            .iter()
            .filter(|u| entity_ids.contains(&u.entity_id))
            .cloned()
            .collect())
    }

    async fn entities_active_before(&self, entity_ids: &[String], date: NaiveDate) -> Result<HashSet<String>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| entity_ids.contains(&e.event.entity_id) && e.event_date() < date)
            .map(|e| e.event.entity_id.clone())
            .collect())
    }
}

#[async_trait]
impl FeatureSink for InMemoryWarehouse {
    async fn upsert_features(&self, rows: &[FeatureRow]) -> Result<usize> {
        self.check_write()?;
        let mut features = self.features.lock();
        for row in rows {
            features.insert((row.entity_id.clone(), row.feature_date), row.clone());
        }
        self.feature_upserts.fetch_add(1, Ordering::SeqCst);
        Ok(rows.len())
    }

    async fn upsert_daily_aggregates(&self, aggregates: &[DailyAggregate]) -> Result<usize> {
        self.check_write()?;
        let mut stored = self.aggregates.lock();
        for agg in aggregates {
            stored.insert((agg.entity_id.clone(), agg.date), agg.clone());
        }
        Ok(aggregates.len())
    }

    async fn fetch_features(&self, entity_id: &str, limit: u32) -> Result<Vec<FeatureRow>> {
        let mut rows = self.features_for(entity_id);
        rows.reverse();
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn store_quality_report(&self, report: &QualityReport) -> Result<()> {
        self.check_write()?;
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryWarehouse {
    async fn load_checkpoints(&self, entity_ids: &[String]) -> Result<HashMap<String, String>> {
        let stored = self.checkpoints.lock();
        Ok(entity_ids
            .iter()
            .filter_map(|id| stored.get(id).map(|json| (id.clone(), json.clone())))
            .collect())
    }

    async fn write_checkpoints(&self, checkpoints: &[Checkpoint]) -> Result<usize> {
        if *self.fail_checkpoint_writes.lock() {
            return Err(Error::database(DbErrorCode::StoreFailed, "Mock checkpoint failure"));
        }
        self.check_write()?;
        let mut stored = self.checkpoints.lock();
        for checkpoint in checkpoints {
            stored.insert(checkpoint.entity_id.clone(), checkpoint.to_json()?);
        }
        Ok(checkpoints.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn test_fetch_events_respects_range_and_entities() {
        let warehouse = InMemoryWarehouse::new();
        let day = fixtures::date(2024, 3, 1);
        warehouse.insert_events(fixtures::page_views("U1", day, 2));
        warehouse.insert_events(fixtures::page_views("U2", day.succ_opt().unwrap(), 1));

        let all = warehouse.fetch_events(DateRange::until(day.succ_opt().unwrap()), None).await.unwrap();
        assert_eq!(all.len(), 3);

        let first_day = warehouse.fetch_events(DateRange::between(day, day), None).await.unwrap();
        assert_eq!(first_day.len(), 2);

        let ids = vec!["U2".to_string()];
        let u2 = warehouse.fetch_events(DateRange::until(day.succ_opt().unwrap()), Some(ids.as_slice())).await.unwrap();
        assert_eq!(u2.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_switch() {
        let warehouse = InMemoryWarehouse::new();
        warehouse.fail_next_writes(1);
        assert!(warehouse.upsert_features(&[]).await.is_err());
        assert!(warehouse.upsert_features(&[]).await.is_ok());
        assert_eq!(warehouse.feature_upserts(), 1);
    }
}
