//! ClickHouse warehouse adapters for the feature engine.
//!
//! Raw events and users are read from here, and feature rows, daily
//! aggregates, checkpoints, quality reports, and internal metrics are written
//! back. [`store`] defines the traits the rest of the workspace depends on.

pub mod client;
pub mod config;
pub mod health;
pub mod insert;
pub mod query;
pub mod schema;
pub mod store;

pub use client::*;
pub use config::*;
pub use health::check_connection;
pub use insert::{insert_metrics, insert_quality_report, insert_raw_events, insert_raw_users};
pub use query::DateRange;
pub use schema::init_schema;
pub use store::{CheckpointStore, EventStore, FeatureSink, Warehouse};
