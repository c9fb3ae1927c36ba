//! Fixed limits, windows, and scoring policy for the feature engine.
//!
//! Scoring weights and tier thresholds are policy: changing any of them
//! changes historical output, so they live here rather than in config.
//!
//! # Usage Note
//!
//! The `#[validate]` derive macro requires literal values in attributes,
//! so field limits are duplicated there. Keep both in sync when modifying.

// === Rolling Windows ===

/// Short trailing window, in rows (active days).
pub const SHORT_WINDOW_DAYS: usize = 7;

/// Long trailing window, in rows (active days).
pub const LONG_WINDOW_DAYS: usize = 30;

/// Largest window the engine maintains.
pub const MAX_WINDOW_DAYS: usize = LONG_WINDOW_DAYS;

/// Trailing daily values a checkpoint must retain to rebuild every window.
pub const CHECKPOINT_TRAILING_DAYS: usize = MAX_WINDOW_DAYS - 1;

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

// === Engagement Scores ===

/// Upper bound for engagement scores.
pub const MAX_ENGAGEMENT_SCORE: i64 = 100;

/// 7-day weights: events, purchases, sessions.
pub const ENGAGEMENT_7D_WEIGHTS: (i64, i64, i64) = (2, 10, 3);

/// 30-day weights: events, purchases, sessions.
pub const ENGAGEMENT_30D_WEIGHTS: (i64, i64, i64) = (1, 5, 2);

// === Value Tiers (lifetime revenue, currency units) ===

pub const HIGH_VALUE_REVENUE: f64 = 1000.0;
pub const MEDIUM_VALUE_REVENUE: f64 = 100.0;

// === Lifecycle Stages (days since registration) ===

pub const NEW_MAX_DAYS: i64 = 7;
pub const RECENT_MAX_DAYS: i64 = 30;
pub const ESTABLISHED_MAX_DAYS: i64 = 90;

// === Behavior Types (30-day window) ===

/// Purchases in 30 rows that make an entity a frequent buyer.
pub const FREQUENT_BUYER_PURCHASES: i64 = 3;

// === Purchase Amounts ===

/// Largest purchase amount, in cents, treated as real revenue (1 billion units).
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000;

// === Record Field Limits (chars) ===

/// Event, entity, and session identifier max length.
pub const MAX_ID_LEN: usize = 128;

/// Event type, platform, and device type max length.
pub const MAX_LABEL_LEN: usize = 64;

/// Maximum metadata JSON size in bytes (16KB).
pub const MAX_METADATA_BYTES: usize = 16 * 1024;

/// Standard email address pattern.
pub const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

// === Data Quality ===

/// Event types the product emits. Anything else is a business-rule finding.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "purchase",
    "page_view",
    "signup",
    "login",
    "logout",
    "click",
    "scroll",
    "search",
    "filter",
    "sort",
    "error",
    "exception",
    "crash",
    "session_start",
    "session_end",
];

/// Data older than this (relative to the reference clock) is stale.
pub const FRESHNESS_MAX_HOURS: i64 = 4;

// === Compute Request Limits ===

/// Maximum compute request payload size in bytes (1MB).
pub const MAX_COMPUTE_BODY_BYTES: usize = 1024 * 1024;

/// Maximum raw events per compute request.
pub const MAX_COMPUTE_EVENTS: usize = 10_000;
