//! ClickHouse table schemas.
//!
//! - Raw tables are append-only MergeTree, partitioned by month.
//! - Output tables use ReplacingMergeTree(updated_at) keyed by
//!   `(entity_id, date)`, so re-inserting a row is an upsert. Reads use
//!   `FINAL` to see the latest version.
//! - Every time column is UTC, so `event_date` is the UTC calendar day.
//! - DateTime64(3) columns map to i64 milliseconds, Date columns to u16 days.

use crate::client::ClickHouseClient;
use engine_core::error::DbErrorCode;
use engine_core::Result;

/// SQL for creating the database.
pub const CREATE_DATABASE: &str = r#"
CREATE DATABASE IF NOT EXISTS features
"#;

/// Raw events as delivered by the upstream producer.
///
/// `timestamp` is nullable so records missing one still reach the validator;
/// those are partitioned by their UTC ingestion day.
pub const CREATE_RAW_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS features.raw_events (
    event_id String,
    entity_id String,
    event_type LowCardinality(String),
    timestamp Nullable(DateTime64(3, 'UTC')),
    session_id Nullable(String),
    platform LowCardinality(Nullable(String)),
    device_type LowCardinality(Nullable(String)),
    metadata String,

    ingested_at DateTime('UTC') DEFAULT now(),
    event_date Date MATERIALIZED toDate(ifNull(timestamp, toDateTime64(ingested_at, 3, 'UTC')), 'UTC')
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(event_date)
ORDER BY (entity_id, event_date, event_id)
SETTINGS index_granularity = 8192
"#;

/// Raw user records. The latest insert per entity wins.
pub const CREATE_RAW_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS features.raw_users (
    entity_id String,
    email Nullable(String),
    created_at Nullable(DateTime64(3, 'UTC')),
    updated_at Nullable(DateTime64(3, 'UTC')),
    country LowCardinality(Nullable(String)),
    timezone Nullable(String),
    subscription_tier LowCardinality(Nullable(String)),
    metadata String,

    ingested_at DateTime('UTC') DEFAULT now()
)
ENGINE = ReplacingMergeTree(ingested_at)
ORDER BY entity_id
"#;

/// Per-entity, per-day aggregates.
pub const CREATE_DAILY_AGGREGATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS features.daily_aggregates (
    entity_id String,
    date Date,

    total_events UInt64,
    page_views UInt64,
    purchases UInt64,
    signups UInt64,
    logins UInt64,
    searches UInt64,
    clicks UInt64,
    total_revenue_cents Int64,
    purchases_without_amount UInt64,

    unique_event_types UInt64,
    unique_sessions UInt64,
    unique_products UInt64,
    unique_categories UInt64,

    web_events UInt64,
    mobile_events UInt64,
    desktop_events UInt64,
    mobile_device_events UInt64,
    tablet_events UInt64,

    invalid_events UInt64,
    first_event_at Nullable(DateTime64(3, 'UTC')),
    last_event_at Nullable(DateTime64(3, 'UTC')),

    updated_at DateTime64(3, 'UTC')
)
ENGINE = ReplacingMergeTree(updated_at)
PARTITION BY toYYYYMM(date)
ORDER BY (entity_id, date)
"#;

/// Rolling feature rows, one per entity per active day.
pub const CREATE_USER_FEATURES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS features.user_features (
    entity_id String,
    feature_date Date,

    events_today UInt64,
    purchases_today UInt64,
    revenue_today Float64,
    sessions_today UInt64,

    events_last_7_days UInt64,
    purchases_last_7_days UInt64,
    revenue_last_7_days Float64,
    sessions_last_7_days UInt64,
    active_days_last_7 UInt64,

    events_last_30_days UInt64,
    purchases_last_30_days UInt64,
    revenue_last_30_days Float64,
    sessions_last_30_days UInt64,
    page_views_last_30_days UInt64,
    web_events_last_30_days UInt64,
    mobile_events_last_30_days UInt64,
    active_days_last_30 UInt64,

    lifetime_events UInt64,
    lifetime_purchases UInt64,
    lifetime_revenue Float64,
    lifetime_sessions UInt64,
    lifetime_active_days UInt64,

    avg_daily_events_7d Float64,
    avg_daily_events_30d Float64,
    events_variance_7d Float64,
    events_growth_rate Nullable(Float64),
    revenue_growth_rate Nullable(Float64),
    days_since_previous_activity Nullable(Int64),
    avg_order_value_30d Float64,

    engagement_score_7d UInt8,
    engagement_score_30d UInt8,
    platform_diversity_score Float64,

    value_tier LowCardinality(String),
    lifecycle_stage LowCardinality(String),
    churn_risk_status LowCardinality(String),
    behavior_type LowCardinality(String),

    days_since_registration Int64,
    days_since_last_activity Int64,
    cohort_month LowCardinality(String),
    country LowCardinality(Nullable(String)),
    subscription_tier LowCardinality(Nullable(String)),

    updated_at DateTime64(3, 'UTC')
)
ENGINE = ReplacingMergeTree(updated_at)
PARTITION BY toYYYYMM(feature_date)
ORDER BY (entity_id, feature_date)
"#;

/// Rolling state per entity for incremental runs.
pub const CREATE_CHECKPOINTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS features.feature_checkpoints (
    entity_id String,
    last_date_processed Date,
    version UInt32,
    state String,
    updated_at DateTime64(3, 'UTC')
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY entity_id
"#;

/// Data-quality reports, one row per monitor run.
pub const CREATE_QUALITY_REPORTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS features.quality_reports (
    generated_at DateTime64(3, 'UTC'),
    status LowCardinality(String),
    events_total UInt64,
    events_invalid UInt64,
    event_validity_pct Float64,
    users_total UInt64,
    users_invalid UInt64,
    purchases_without_amount UInt64,
    issues UInt32,
    report String
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(generated_at)
ORDER BY generated_at
TTL toDateTime(generated_at) + INTERVAL 180 DAY
"#;

/// Internal metrics, one row per metric per flush.
pub const CREATE_METRICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS features.internal_metrics (
    timestamp DateTime64(3, 'UTC'),
    name LowCardinality(String),
    value Float64
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(timestamp)
ORDER BY (name, timestamp)
TTL toDateTime(timestamp) + INTERVAL 30 DAY
SETTINGS index_granularity = 8192
"#;

/// All table creation statements.
pub fn all_tables() -> Vec<&'static str> {
    vec![
        CREATE_DATABASE,
        CREATE_RAW_EVENTS_TABLE,
        CREATE_RAW_USERS_TABLE,
        CREATE_DAILY_AGGREGATES_TABLE,
        CREATE_USER_FEATURES_TABLE,
        CREATE_CHECKPOINTS_TABLE,
        CREATE_QUALITY_REPORTS_TABLE,
        CREATE_METRICS_TABLE,
    ]
}

/// Initialize the database schema.
///
/// Creates the database and all tables if they don't exist.
pub async fn init_schema(client: &ClickHouseClient) -> Result<()> {
    for sql in all_tables() {
        client.inner().query(sql).execute().await.map_err(|e| {
            engine_core::Error::database(DbErrorCode::StoreFailed, format!("Schema init error: {}", e))
        })?;
    }
    Ok(())
}
