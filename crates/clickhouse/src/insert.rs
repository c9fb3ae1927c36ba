//! Row types and batch inserts for the warehouse tables.

use crate::client::ClickHouseClient;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clickhouse::Row;
use engine_core::error::DbErrorCode;
use engine_core::{
    Checkpoint, DailyAggregate, Error, FeatureRow, QualityReport, RawEvent, RawUser, Result,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use telemetry::{metrics, MetricsSnapshot};
use tracing::debug;

// ============================================================================
// Column conversions
// ============================================================================

/// ClickHouse `Date` is a u16 day count from 1970-01-01.
pub fn date_to_days(date: NaiveDate) -> u16 {
    (date - NaiveDate::default()).num_days().clamp(0, u16::MAX as i64) as u16
}

pub fn days_to_date(days: u16) -> NaiveDate {
    NaiveDate::default() + Duration::days(days as i64)
}

pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn metadata_to_column(metadata: &Value) -> String {
    match metadata {
        Value::Null => String::new(),
        // Already JSON-encoded by the producer
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn metadata_from_column(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Tags are stored as their snake_case names.
fn parse_tag<T: DeserializeOwned>(column: &str, value: String) -> Result<T> {
    serde_json::from_value(Value::String(value.clone())).map_err(|_| {
        Error::database(
            DbErrorCode::QueryFailed,
            format!("unknown {} value '{}'", column, value),
        )
    })
}

fn tag_name<T: Serialize>(tag: &T) -> String {
    match serde_json::to_value(tag) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}

pub(crate) fn store_error(e: clickhouse::error::Error) -> Error {
    metrics().sink_errors.inc();
    Error::database(DbErrorCode::StoreFailed, format!("Insert error: {}", e))
}

// ============================================================================
// Raw tables
// ============================================================================

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct RawEventRow {
    pub event_id: String,
    pub entity_id: String,
    pub event_type: String,
    pub timestamp: Option<i64>, // DateTime64(3) as milliseconds
    pub session_id: Option<String>,
    pub platform: Option<String>,
    pub device_type: Option<String>,
    pub metadata: String, // JSON blob
}

impl From<&RawEvent> for RawEventRow {
    fn from(event: &RawEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            entity_id: event.entity_id.clone(),
            event_type: event.event_type.clone(),
            timestamp: event.timestamp.map(|ts| ts.timestamp_millis()),
            session_id: event.session_id.clone(),
            platform: event.platform.clone(),
            device_type: event.device_type.clone(),
            metadata: metadata_to_column(&event.metadata),
        }
    }
}

impl From<RawEventRow> for RawEvent {
    fn from(row: RawEventRow) -> Self {
        Self {
            event_id: row.event_id,
            entity_id: row.entity_id,
            event_type: row.event_type,
            timestamp: row.timestamp.and_then(millis_to_datetime),
            session_id: row.session_id,
            platform: row.platform,
            device_type: row.device_type,
            metadata: metadata_from_column(&row.metadata),
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct RawUserRow {
    pub entity_id: String,
    pub email: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub country: Option<String>,
    pub timezone: Option<String>,
    pub subscription_tier: Option<String>,
    pub metadata: String,
}

impl From<&RawUser> for RawUserRow {
    fn from(user: &RawUser) -> Self {
        Self {
            entity_id: user.entity_id.clone(),
            email: user.email.clone(),
            created_at: user.created_at.map(|ts| ts.timestamp_millis()),
            updated_at: user.updated_at.map(|ts| ts.timestamp_millis()),
            country: user.country.clone(),
            timezone: user.timezone.clone(),
            subscription_tier: user.subscription_tier.clone(),
            metadata: metadata_to_column(&user.metadata),
        }
    }
}

impl From<RawUserRow> for RawUser {
    fn from(row: RawUserRow) -> Self {
        Self {
            entity_id: row.entity_id,
            email: row.email,
            created_at: row.created_at.and_then(millis_to_datetime),
            updated_at: row.updated_at.and_then(millis_to_datetime),
            country: row.country,
            timezone: row.timezone,
            subscription_tier: row.subscription_tier,
            metadata: metadata_from_column(&row.metadata),
        }
    }
}

// ============================================================================
// Output tables
// ============================================================================

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct DailyAggregateRow {
    pub entity_id: String,
    pub date: u16,
    pub total_events: u64,
    pub page_views: u64,
    pub purchases: u64,
    pub signups: u64,
    pub logins: u64,
    pub searches: u64,
    pub clicks: u64,
    pub total_revenue_cents: i64,
    pub purchases_without_amount: u64,
    pub unique_event_types: u64,
    pub unique_sessions: u64,
    pub unique_products: u64,
    pub unique_categories: u64,
    pub web_events: u64,
    pub mobile_events: u64,
    pub desktop_events: u64,
    pub mobile_device_events: u64,
    pub tablet_events: u64,
    pub invalid_events: u64,
    pub first_event_at: Option<i64>,
    pub last_event_at: Option<i64>,
    pub updated_at: i64,
}

impl DailyAggregateRow {
    pub fn new(agg: &DailyAggregate, updated_at: i64) -> Self {
        Self {
            entity_id: agg.entity_id.clone(),
            date: date_to_days(agg.date),
            total_events: agg.total_events,
            page_views: agg.page_views,
            purchases: agg.purchases,
            signups: agg.signups,
            logins: agg.logins,
            searches: agg.searches,
            clicks: agg.clicks,
            total_revenue_cents: agg.total_revenue_cents,
            purchases_without_amount: agg.purchases_without_amount,
            unique_event_types: agg.unique_event_types,
            unique_sessions: agg.unique_sessions,
            unique_products: agg.unique_products,
            unique_categories: agg.unique_categories,
            web_events: agg.web_events,
            mobile_events: agg.mobile_events,
            desktop_events: agg.desktop_events,
            mobile_device_events: agg.mobile_device_events,
            tablet_events: agg.tablet_events,
            invalid_events: agg.invalid_events,
            first_event_at: agg.first_event_at.map(|ts| ts.timestamp_millis()),
            last_event_at: agg.last_event_at.map(|ts| ts.timestamp_millis()),
            updated_at,
        }
    }
}

/// A feature row as stored in `user_features`.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct UserFeatureRow {
    pub entity_id: String,
    pub feature_date: u16,
    pub events_today: u64,
    pub purchases_today: u64,
    pub revenue_today: f64,
    pub sessions_today: u64,
    pub events_last_7_days: u64,
    pub purchases_last_7_days: u64,
    pub revenue_last_7_days: f64,
    pub sessions_last_7_days: u64,
    pub active_days_last_7: u64,
    pub events_last_30_days: u64,
    pub purchases_last_30_days: u64,
    pub revenue_last_30_days: f64,
    pub sessions_last_30_days: u64,
    pub page_views_last_30_days: u64,
    pub web_events_last_30_days: u64,
    pub mobile_events_last_30_days: u64,
    pub active_days_last_30: u64,
    pub lifetime_events: u64,
    pub lifetime_purchases: u64,
    pub lifetime_revenue: f64,
    pub lifetime_sessions: u64,
    pub lifetime_active_days: u64,
    pub avg_daily_events_7d: f64,
    pub avg_daily_events_30d: f64,
    pub events_variance_7d: f64,
    pub events_growth_rate: Option<f64>,
    pub revenue_growth_rate: Option<f64>,
    pub days_since_previous_activity: Option<i64>,
    pub avg_order_value_30d: f64,
    pub engagement_score_7d: u8,
    pub engagement_score_30d: u8,
    pub platform_diversity_score: f64,
    pub value_tier: String,
    pub lifecycle_stage: String,
    pub churn_risk_status: String,
    pub behavior_type: String,
    pub days_since_registration: i64,
    pub days_since_last_activity: i64,
    pub cohort_month: String,
    pub country: Option<String>,
    pub subscription_tier: Option<String>,
    pub updated_at: i64,
}

impl UserFeatureRow {
    pub fn new(row: &FeatureRow, updated_at: i64) -> Self {
        Self {
            entity_id: row.entity_id.clone(),
            feature_date: date_to_days(row.feature_date),
            events_today: row.events_today,
            purchases_today: row.purchases_today,
            revenue_today: row.revenue_today,
            sessions_today: row.sessions_today,
            events_last_7_days: row.events_last_7_days,
            purchases_last_7_days: row.purchases_last_7_days,
            revenue_last_7_days: row.revenue_last_7_days,
            sessions_last_7_days: row.sessions_last_7_days,
            active_days_last_7: row.active_days_last_7,
            events_last_30_days: row.events_last_30_days,
            purchases_last_30_days: row.purchases_last_30_days,
            revenue_last_30_days: row.revenue_last_30_days,
            sessions_last_30_days: row.sessions_last_30_days,
            page_views_last_30_days: row.page_views_last_30_days,
            web_events_last_30_days: row.web_events_last_30_days,
            mobile_events_last_30_days: row.mobile_events_last_30_days,
            active_days_last_30: row.active_days_last_30,
            lifetime_events: row.lifetime_events,
            lifetime_purchases: row.lifetime_purchases,
            lifetime_revenue: row.lifetime_revenue,
            lifetime_sessions: row.lifetime_sessions,
            lifetime_active_days: row.lifetime_active_days,
            avg_daily_events_7d: row.avg_daily_events_7d,
            avg_daily_events_30d: row.avg_daily_events_30d,
            events_variance_7d: row.events_variance_7d,
            events_growth_rate: row.events_growth_rate,
            revenue_growth_rate: row.revenue_growth_rate,
            days_since_previous_activity: row.days_since_previous_activity,
            avg_order_value_30d: row.avg_order_value_30d,
            engagement_score_7d: row.engagement_score_7d,
            engagement_score_30d: row.engagement_score_30d,
            platform_diversity_score: row.platform_diversity_score,
            value_tier: tag_name(&row.value_tier),
            lifecycle_stage: tag_name(&row.lifecycle_stage),
            churn_risk_status: tag_name(&row.churn_risk_status),
            behavior_type: tag_name(&row.behavior_type),
            days_since_registration: row.days_since_registration,
            days_since_last_activity: row.days_since_last_activity,
            cohort_month: row.cohort_month.clone(),
            country: row.country.clone(),
            subscription_tier: row.subscription_tier.clone(),
            updated_at,
        }
    }
}

impl TryFrom<UserFeatureRow> for FeatureRow {
    type Error = Error;

    fn try_from(row: UserFeatureRow) -> Result<Self> {
        Ok(Self {
            entity_id: row.entity_id,
            feature_date: days_to_date(row.feature_date),
            events_today: row.events_today,
            purchases_today: row.purchases_today,
            revenue_today: row.revenue_today,
            sessions_today: row.sessions_today,
            events_last_7_days: row.events_last_7_days,
            purchases_last_7_days: row.purchases_last_7_days,
            revenue_last_7_days: row.revenue_last_7_days,
            sessions_last_7_days: row.sessions_last_7_days,
            active_days_last_7: row.active_days_last_7,
            events_last_30_days: row.events_last_30_days,
            purchases_last_30_days: row.purchases_last_30_days,
            revenue_last_30_days: row.revenue_last_30_days,
            sessions_last_30_days: row.sessions_last_30_days,
            page_views_last_30_days: row.page_views_last_30_days,
            web_events_last_30_days: row.web_events_last_30_days,
            mobile_events_last_30_days: row.mobile_events_last_30_days,
            active_days_last_30: row.active_days_last_30,
            lifetime_events: row.lifetime_events,
            lifetime_purchases: row.lifetime_purchases,
            lifetime_revenue: row.lifetime_revenue,
            lifetime_sessions: row.lifetime_sessions,
            lifetime_active_days: row.lifetime_active_days,
            avg_daily_events_7d: row.avg_daily_events_7d,
            avg_daily_events_30d: row.avg_daily_events_30d,
            events_variance_7d: row.events_variance_7d,
            events_growth_rate: row.events_growth_rate,
            revenue_growth_rate: row.revenue_growth_rate,
            days_since_previous_activity: row.days_since_previous_activity,
            avg_order_value_30d: row.avg_order_value_30d,
            engagement_score_7d: row.engagement_score_7d,
            engagement_score_30d: row.engagement_score_30d,
            platform_diversity_score: row.platform_diversity_score,
            value_tier: parse_tag("value_tier", row.value_tier)?,
            lifecycle_stage: parse_tag("lifecycle_stage", row.lifecycle_stage)?,
            churn_risk_status: parse_tag("churn_risk_status", row.churn_risk_status)?,
            behavior_type: parse_tag("behavior_type", row.behavior_type)?,
            days_since_registration: row.days_since_registration,
            days_since_last_activity: row.days_since_last_activity,
            cohort_month: row.cohort_month,
            country: row.country,
            subscription_tier: row.subscription_tier,
        })
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct CheckpointRow {
    pub entity_id: String,
    pub last_date_processed: u16,
    pub version: u32,
    pub state: String, // Checkpoint JSON
    pub updated_at: i64,
}

impl CheckpointRow {
    pub fn new(checkpoint: &Checkpoint, updated_at: i64) -> Result<Self> {
        Ok(Self {
            entity_id: checkpoint.entity_id.clone(),
            last_date_processed: date_to_days(checkpoint.last_date_processed),
            version: checkpoint.version,
            state: checkpoint.to_json()?,
            updated_at,
        })
    }
}

#[derive(Debug, Clone, Row, Serialize)]
pub struct QualityReportRow {
    pub generated_at: i64,
    pub status: String,
    pub events_total: u64,
    pub events_invalid: u64,
    pub event_validity_pct: f64,
    pub users_total: u64,
    pub users_invalid: u64,
    pub purchases_without_amount: u64,
    pub issues: u32,
    pub report: String,
}

impl QualityReportRow {
    pub fn new(report: &QualityReport) -> Result<Self> {
        Ok(Self {
            generated_at: report.generated_at.timestamp_millis(),
            status: report.status().as_str().to_string(),
            events_total: report.events.total_rows,
            events_invalid: report.events.invalid_rows,
            event_validity_pct: report.events.validity_pct,
            users_total: report.users.total_rows,
            users_invalid: report.users.invalid_rows,
            purchases_without_amount: report.purchases_without_amount,
            issues: report.issues().len() as u32,
            report: serde_json::to_string(report)?,
        })
    }
}

/// Internal metrics row for ClickHouse.
#[derive(Debug, Clone, Row, Serialize)]
pub struct MetricRow {
    pub timestamp: i64,
    pub name: String,
    pub value: f64,
}

// ============================================================================
// Inserts
// ============================================================================

async fn insert_rows<T>(client: &ClickHouseClient, table: &str, rows: &[T]) -> Result<usize>
where
    T: Row + Serialize + Send + Sync,
{
    if rows.is_empty() {
        return Ok(0);
    }

    let start = Instant::now();
    let mut insert = client.inner().insert(table).map_err(store_error)?;
    for row in rows {
        insert.write(row).await.map_err(store_error)?;
    }
    insert.end().await.map_err(store_error)?;

    metrics().sink_latency_ms.observe_since(start);
    debug!(
        table = table,
        count = rows.len(),
        latency_ms = %start.elapsed().as_millis(),
        "Inserted rows to ClickHouse"
    );

    Ok(rows.len())
}

/// Appends raw events (upstream loaders and tests).
pub async fn insert_raw_events(client: &ClickHouseClient, events: &[RawEvent]) -> Result<usize> {
    let rows: Vec<RawEventRow> = events.iter().map(RawEventRow::from).collect();
    insert_rows(client, "raw_events", &rows).await
}

pub async fn insert_raw_users(client: &ClickHouseClient, users: &[RawUser]) -> Result<usize> {
    let rows: Vec<RawUserRow> = users.iter().map(RawUserRow::from).collect();
    insert_rows(client, "raw_users", &rows).await
}

pub async fn upsert_daily_aggregates(client: &ClickHouseClient, aggs: &[DailyAggregate]) -> Result<usize> {
    let now = Utc::now().timestamp_millis();
    let rows: Vec<_> = aggs.iter().map(|a| DailyAggregateRow::new(a, now)).collect();
    insert_rows(client, "daily_aggregates", &rows).await
}

/// Upserts feature rows by `(entity_id, feature_date)`.
pub async fn upsert_features(client: &ClickHouseClient, features: &[FeatureRow]) -> Result<usize> {
    let now = Utc::now().timestamp_millis();
    let rows: Vec<_> = features.iter().map(|f| UserFeatureRow::new(f, now)).collect();
    let count = insert_rows(client, "user_features", &rows).await?;
    metrics().feature_rows_upserted.inc_by(count as u64);
    Ok(count)
}

pub async fn write_checkpoints(client: &ClickHouseClient, checkpoints: &[Checkpoint]) -> Result<usize> {
    let now = Utc::now().timestamp_millis();
    let rows = checkpoints
        .iter()
        .map(|c| CheckpointRow::new(c, now))
        .collect::<Result<Vec<_>>>()?;
    let count = insert_rows(client, "feature_checkpoints", &rows).await?;
    metrics().checkpoints_written.inc_by(count as u64);
    Ok(count)
}

pub async fn insert_quality_report(client: &ClickHouseClient, report: &QualityReport) -> Result<()> {
    insert_rows(client, "quality_reports", &[QualityReportRow::new(report)?]).await?;
    Ok(())
}

/// Insert internal metrics snapshot.
pub async fn insert_metrics(client: &ClickHouseClient, snapshot: MetricsSnapshot) -> Result<()> {
    let timestamp = snapshot.timestamp.timestamp_millis();
    let rows: Vec<MetricRow> = snapshot
        .as_pairs()
        .into_iter()
        .map(|(name, value)| MetricRow {
            timestamp,
            name: name.to_string(),
            value,
        })
        .collect();
    insert_rows(client, "internal_metrics", &rows).await?;
    Ok(())
}
