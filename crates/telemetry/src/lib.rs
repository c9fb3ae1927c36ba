//! Internal telemetry for the feature engine: structured logging, in-process
//! metrics, and component health.
//!
//! Metrics are not exported to an external system; the scheduler flushes
//! snapshots into the warehouse alongside the features themselves.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
