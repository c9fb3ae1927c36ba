//! Range queries against the raw and output tables.

use crate::client::ClickHouseClient;
use crate::insert::{CheckpointRow, RawEventRow, RawUserRow, UserFeatureRow};
use chrono::NaiveDate;
use clickhouse::Row;
use engine_core::error::DbErrorCode;
use engine_core::{Error, FeatureRow, RawEvent, RawUser, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::debug;

fn query_error(e: clickhouse::error::Error) -> Error {
    Error::database(DbErrorCode::QueryFailed, format!("Query error: {}", e))
}

/// Inclusive date range over partition dates. `start: None` means
/// "from the beginning of history".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end,
        }
    }

    pub fn until(end: NaiveDate) -> Self {
        Self { start: None, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && date <= self.end
    }
}

/// Fetches raw events in a date range, optionally for a subset of entities.
pub async fn fetch_events(
    client: &ClickHouseClient,
    range: DateRange,
    entity_ids: Option<&[String]>,
) -> Result<Vec<RawEvent>> {
    let start = Instant::now();
    let mut sql = String::from("SELECT ?fields FROM raw_events WHERE event_date <= toDate(?)");
    if range.start.is_some() {
        sql.push_str(" AND event_date >= toDate(?)");
    }
    if entity_ids.is_some() {
        sql.push_str(" AND has(?, entity_id)");
    }
    sql.push_str(" ORDER BY entity_id, event_date, event_id");

    let mut query = client.inner().query(&sql).bind(range.end.to_string());
    if let Some(start) = range.start {
        query = query.bind(start.to_string());
    }
    if let Some(ids) = entity_ids {
        query = query.bind(ids);
    }

    let rows: Vec<RawEventRow> = query.fetch_all().await.map_err(query_error)?;
    debug!(
        count = rows.len(),
        latency_ms = %start.elapsed().as_millis(),
        "Fetched raw events"
    );
    Ok(rows.into_iter().map(RawEvent::from).collect())
}

/// Fetches the latest user record for each entity.
pub async fn fetch_users(client: &ClickHouseClient, entity_ids: &[String]) -> Result<Vec<RawUser>> {
    if entity_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<RawUserRow> = client
        .inner()
        .query("SELECT ?fields FROM raw_users FINAL WHERE has(?, entity_id)")
        .bind(entity_ids)
        .fetch_all()
        .await
        .map_err(query_error)?;
    Ok(rows.into_iter().map(RawUser::from).collect())
}

#[derive(Debug, Row, Deserialize)]
struct EntityIdRow {
    entity_id: String,
}

/// Entities among `entity_ids` with any raw event dated before `date`.
pub async fn entities_active_before(
    client: &ClickHouseClient,
    entity_ids: &[String],
    date: NaiveDate,
) -> Result<HashSet<String>> {
    if entity_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let rows: Vec<EntityIdRow> = client
        .inner()
        .query("SELECT DISTINCT entity_id FROM raw_events WHERE has(?, entity_id) AND event_date < toDate(?)")
        .bind(entity_ids)
        .bind(date.to_string())
        .fetch_all()
        .await
        .map_err(query_error)?;
    Ok(rows.into_iter().map(|r| r.entity_id).collect())
}

/// Latest feature rows for an entity, newest first.
pub async fn fetch_features(client: &ClickHouseClient, entity_id: &str, limit: u32) -> Result<Vec<FeatureRow>> {
    let rows: Vec<UserFeatureRow> = client
        .inner()
        .query("SELECT ?fields FROM user_features FINAL WHERE entity_id = ? ORDER BY feature_date DESC LIMIT ?")
        .bind(entity_id)
        .bind(limit)
        .fetch_all()
        .await
        .map_err(query_error)?;
    rows.into_iter().map(FeatureRow::try_from).collect()
}

#[derive(Debug, Row, Deserialize)]
struct StoredState {
    entity_id: String,
    state: String,
}

/// Raw checkpoint JSON per entity. Decoding (and corruption detection) is
/// left to the caller.
pub async fn load_checkpoints(
    client: &ClickHouseClient,
    entity_ids: &[String],
) -> Result<HashMap<String, String>> {
    if entity_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<StoredState> = client
        .inner()
        .query("SELECT entity_id, state FROM feature_checkpoints FINAL WHERE has(?, entity_id)")
        .bind(entity_ids)
        .fetch_all()
        .await
        .map_err(query_error)?;
    Ok(rows.into_iter().map(|r| (r.entity_id, r.state)).collect())
}

/// Count rows in a table (for tests and admin).
pub async fn count_rows(client: &ClickHouseClient, table: &str) -> Result<u64> {
    client
        .inner()
        .query(&format!("SELECT count() FROM {}", table))
        .fetch_one()
        .await
        .map_err(query_error)
}

/// Count an entity's feature rows after key deduplication.
pub async fn count_features(client: &ClickHouseClient, entity_id: &str) -> Result<u64> {
    client
        .inner()
        .query("SELECT count() FROM user_features FINAL WHERE entity_id = ?")
        .bind(entity_id)
        .fetch_one()
        .await
        .map_err(query_error)
}

/// Latest stored checkpoint row for an entity (for tests and admin).
pub async fn fetch_checkpoint_row(client: &ClickHouseClient, entity_id: &str) -> Result<Option<CheckpointRow>> {
    client
        .inner()
        .query("SELECT ?fields FROM feature_checkpoints FINAL WHERE entity_id = ?")
        .bind(entity_id)
        .fetch_optional()
        .await
        .map_err(query_error)
}
