//! Background workers for the feature engine.
//!
//! - Pipeline (validate, aggregate, roll and derive on a rayon pool)
//! - Incremental job (checkpoint resume with full-recompute fallback)
//! - Backfill (range recomputation from full history)
//! - Quality monitor and notifications
//! - Scheduler (interval loops for the above plus metrics flush)

pub mod backfill;
pub mod job;
pub mod lease;
pub mod notifications;
pub mod pipeline;
pub mod quality;
pub mod scheduler;
pub mod sink;

pub use backfill::BackfillWorker;
pub use job::{last_complete_day, FeatureJob, JobConfig, JobMode, JobSummary};
pub use lease::{EntityLeases, LeaseGuard};
pub use notifications::{Notification, NotificationChannel, NotificationWorker};
pub use pipeline::{BatchOutput, EntityFailure, FeatureBatch, FeaturePipeline};
pub use quality::QualityMonitor;
pub use scheduler::*;
pub use sink::{persist, PendingWrites, PersistCounts, RetryPolicy};
