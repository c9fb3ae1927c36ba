//! Internal metrics collection.
//!
//! Counters live in memory and the scheduler periodically flushes a
//! [`MetricsSnapshot`] to the warehouse's `internal_metrics` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, &bound) in Self::BUCKET_BOUNDS.iter().enumerate() {
            if ms <= bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        // Value exceeds all buckets, add to last
        self.buckets[10].fetch_add(1, Ordering::Relaxed);
    }

    /// Records the time elapsed since `start`.
    pub fn observe_since(&self, start: Instant) {
        self.observe(start.elapsed().as_millis() as u64);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Returns bucket counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the feature engine.
#[derive(Debug, Default)]
pub struct Metrics {
    // Validation
    pub events_received: Counter,
    pub events_valid: Counter,
    pub events_invalid: Counter,
    pub users_invalid: Counter,
    pub purchases_without_amount: Counter,

    // Computation
    pub daily_aggregates_built: Counter,
    pub entities_processed: Counter,
    pub entities_failed: Counter,
    pub full_recompute_fallbacks: Counter,
    pub feature_rows_emitted: Counter,

    // Sink
    pub feature_rows_upserted: Counter,
    pub sink_errors: Counter,
    pub checkpoints_written: Counter,

    // Jobs
    pub job_runs: Counter,
    pub job_failures: Counter,

    // Latency histograms
    pub compute_latency_ms: Histogram,
    pub sink_latency_ms: Histogram,

    // Gauges
    pub entities_in_flight: Gauge,
    pub last_job_rows: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            events_received: self.events_received.get(),
            events_valid: self.events_valid.get(),
            events_invalid: self.events_invalid.get(),
            users_invalid: self.users_invalid.get(),
            purchases_without_amount: self.purchases_without_amount.get(),
            daily_aggregates_built: self.daily_aggregates_built.get(),
            entities_processed: self.entities_processed.get(),
            entities_failed: self.entities_failed.get(),
            full_recompute_fallbacks: self.full_recompute_fallbacks.get(),
            feature_rows_emitted: self.feature_rows_emitted.get(),
            feature_rows_upserted: self.feature_rows_upserted.get(),
            sink_errors: self.sink_errors.get(),
            checkpoints_written: self.checkpoints_written.get(),
            job_runs: self.job_runs.get(),
            job_failures: self.job_failures.get(),
            compute_latency_mean_ms: self.compute_latency_ms.mean(),
            sink_latency_mean_ms: self.sink_latency_ms.mean(),
            entities_in_flight: self.entities_in_flight.get(),
            last_job_rows: self.last_job_rows.get(),
        }
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub events_received: u64,
    pub events_valid: u64,
    pub events_invalid: u64,
    pub users_invalid: u64,
    pub purchases_without_amount: u64,
    pub daily_aggregates_built: u64,
    pub entities_processed: u64,
    pub entities_failed: u64,
    pub full_recompute_fallbacks: u64,
    pub feature_rows_emitted: u64,
    pub feature_rows_upserted: u64,
    pub sink_errors: u64,
    pub checkpoints_written: u64,
    pub job_runs: u64,
    pub job_failures: u64,
    pub compute_latency_mean_ms: f64,
    pub sink_latency_mean_ms: f64,
    pub entities_in_flight: u64,
    pub last_job_rows: u64,
}

impl MetricsSnapshot {
    /// Flattens the snapshot into `(name, value)` pairs for storage.
    pub fn as_pairs(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("events_received", self.events_received as f64),
            ("events_valid", self.events_valid as f64),
            ("events_invalid", self.events_invalid as f64),
            ("users_invalid", self.users_invalid as f64),
            ("purchases_without_amount", self.purchases_without_amount as f64),
            ("daily_aggregates_built", self.daily_aggregates_built as f64),
            ("entities_processed", self.entities_processed as f64),
            ("entities_failed", self.entities_failed as f64),
            ("full_recompute_fallbacks", self.full_recompute_fallbacks as f64),
            ("feature_rows_emitted", self.feature_rows_emitted as f64),
            ("feature_rows_upserted", self.feature_rows_upserted as f64),
            ("sink_errors", self.sink_errors as f64),
            ("checkpoints_written", self.checkpoints_written as f64),
            ("job_runs", self.job_runs as f64),
            ("job_failures", self.job_failures as f64),
            ("compute_latency_mean_ms", self.compute_latency_mean_ms),
            ("sink_latency_mean_ms", self.sink_latency_mean_ms),
            ("entities_in_flight", self.entities_in_flight as f64),
            ("last_job_rows", self.last_job_rows as f64),
        ]
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
