//! Core types and pure computation for the feature engine.
//!
//! Raw records flow through [`schema`] (validation), [`aggregate`] (per-day
//! totals), [`rolling`] (trailing windows and lifetime totals), and
//! [`features`] (scores and segments). [`engine`] ties the last three together
//! for one entity. Nothing here performs I/O.

pub mod aggregate;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod features;
pub mod limits;
pub mod quality;
pub mod rolling;
pub mod schema;

pub use aggregate::{build_daily_aggregates, DailyAggregate};
pub use checkpoint::Checkpoint;
pub use engine::{process_entity, EntityInput, EntityOutput};
pub use error::{Error, Result};
pub use events::*;
pub use features::{
    derive, BehaviorType, ChurnRiskStatus, FeatureContext, FeatureRow, LifecycleStage, ValueTier,
};
pub use quality::{QualityIssue, QualityReport, QualityStatus};
pub use rolling::{compute_rolling, DailyValues, LifetimeTotals, RollingRow, RollingState, WindowTotals};
pub use schema::{validate_event, validate_events, validate_user, validate_users};
