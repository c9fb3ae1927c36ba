//! Row-based rolling windows over an entity's daily aggregates.
//!
//! Windows count rows, not calendar days: an entity with gaps in its activity
//! accumulates across its last N *active* days. State is a bounded buffer of
//! the trailing raw daily values plus lifetime totals, which is exactly what a
//! [`Checkpoint`] persists, so resuming from a checkpoint and recomputing from
//! scratch produce identical rows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::aggregate::{safe_ratio, DailyAggregate};
use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};
use crate::limits::{CHECKPOINT_TRAILING_DAYS, CHECKPOINT_VERSION, LONG_WINDOW_DAYS, SHORT_WINDOW_DAYS};

/// The per-day metrics the windows accumulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyValues {
    pub date: NaiveDate,
    pub events: u64,
    pub purchases: u64,
    pub revenue_cents: i64,
    pub sessions: u64,
    pub page_views: u64,
    pub web_events: u64,
    pub mobile_events: u64,
}

impl From<&DailyAggregate> for DailyValues {
    fn from(agg: &DailyAggregate) -> Self {
        Self {
            date: agg.date,
            events: agg.total_events,
            purchases: agg.purchases,
            revenue_cents: agg.total_revenue_cents,
            sessions: agg.unique_sessions,
            page_views: agg.page_views,
            web_events: agg.web_events,
            mobile_events: agg.mobile_events,
        }
    }
}

/// Sums over one trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTotals {
    /// Rows present in the window (at most the window size)
    pub rows: u64,
    pub events: u64,
    pub purchases: u64,
    pub revenue_cents: i64,
    pub sessions: u64,
    pub page_views: u64,
    pub web_events: u64,
    pub mobile_events: u64,
}

impl WindowTotals {
    // Saturating: resumed checkpoints carry caller-supplied values.
    fn add(&mut self, day: &DailyValues) {
        self.rows += 1;
        self.events = self.events.saturating_add(day.events);
        self.purchases = self.purchases.saturating_add(day.purchases);
        self.revenue_cents = self.revenue_cents.saturating_add(day.revenue_cents);
        self.sessions = self.sessions.saturating_add(day.sessions);
        self.page_views = self.page_views.saturating_add(day.page_views);
        self.web_events = self.web_events.saturating_add(day.web_events);
        self.mobile_events = self.mobile_events.saturating_add(day.mobile_events);
    }

    fn over<'a>(days: impl Iterator<Item = &'a DailyValues>) -> Self {
        let mut totals = Self::default();
        for day in days {
            totals.add(day);
        }
        totals
    }

    /// Window sum divided by rows present.
    pub fn avg_daily_events(&self) -> f64 {
        safe_ratio(self.events as f64, self.rows as f64)
    }
}

/// Cumulative totals from an entity's first active day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeTotals {
    pub events: u64,
    pub purchases: u64,
    pub revenue_cents: i64,
    pub sessions: u64,
    pub active_days: u64,
    pub first_active_date: Option<NaiveDate>,
}

impl LifetimeTotals {
    fn add(&mut self, day: &DailyValues) {
        self.events = self.events.saturating_add(day.events);
        self.purchases = self.purchases.saturating_add(day.purchases);
        self.revenue_cents = self.revenue_cents.saturating_add(day.revenue_cents);
        self.sessions = self.sessions.saturating_add(day.sessions);
        self.active_days = self.active_days.saturating_add(1);
        self.first_active_date.get_or_insert(day.date);
    }
}

/// One day of an entity's history with its windows attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingRow {
    pub entity_id: String,
    pub date: NaiveDate,
    pub day: DailyValues,
    pub last_7: WindowTotals,
    pub last_30: WindowTotals,
    pub lifetime: LifetimeTotals,
    pub avg_daily_events_7d: f64,
    pub avg_daily_events_30d: f64,
    /// Population variance of daily events over the 7-row window
    pub events_variance_7d: f64,
    pub events_growth_rate: Option<f64>,
    pub revenue_growth_rate: Option<f64>,
    /// Calendar days since the previous row
    pub days_since_previous_activity: Option<i64>,
}

fn growth_rate(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        None
    } else {
        Some((current - previous) / previous)
    }
}

fn population_variance<'a>(days: impl Iterator<Item = &'a DailyValues> + Clone) -> f64 {
    let n = days.clone().count();
    if n == 0 {
        return 0.0;
    }
    let mean = days.clone().map(|d| d.events as f64).sum::<f64>() / n as f64;
    days.map(|d| (d.events as f64 - mean).powi(2)).sum::<f64>() / n as f64
}

/// The last `size` rows ending at `day`.
fn window<'a>(
    trailing: &'a VecDeque<DailyValues>,
    day: &'a DailyValues,
    size: usize,
) -> impl Iterator<Item = &'a DailyValues> + Clone + 'a {
    trailing
        .iter()
        .skip(trailing.len().saturating_sub(size - 1))
        .chain(std::iter::once(day))
}

/// Sliding-window accumulator for a single entity.
#[derive(Debug, Clone)]
pub struct RollingState {
    entity_id: String,
    /// Trailing daily values, oldest first
    trailing: VecDeque<DailyValues>,
    lifetime: LifetimeTotals,
}

impl RollingState {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            trailing: VecDeque::with_capacity(CHECKPOINT_TRAILING_DAYS + 1),
            lifetime: LifetimeTotals::default(),
        }
    }

    /// Rebuilds state from a checkpoint after verifying it.
    pub fn resume(checkpoint: Checkpoint) -> Result<Self> {
        checkpoint.verify()?;
        Ok(Self {
            entity_id: checkpoint.entity_id,
            trailing: checkpoint.trailing_daily_values.into(),
            lifetime: checkpoint.lifetime,
        })
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.trailing.back().map(|d| d.date)
    }

    /// Appends the next day and returns its row.
    ///
    /// Days must arrive in strictly ascending date order. On error the state
    /// is left untouched.
    pub fn push(&mut self, aggregate: &DailyAggregate) -> Result<RollingRow> {
        if aggregate.entity_id != self.entity_id {
            return Err(Error::validation(format!(
                "aggregate for entity '{}' pushed into rolling state of '{}'",
                aggregate.entity_id, self.entity_id
            )));
        }
        if let Some(last) = self.last_date() {
            if aggregate.date <= last {
                return Err(Error::out_of_order(&self.entity_id, aggregate.date, last));
            }
        }

        let day = DailyValues::from(aggregate);
        let previous = self.trailing.back().copied();

        let last_7 = WindowTotals::over(window(&self.trailing, &day, SHORT_WINDOW_DAYS));
        let last_30 = WindowTotals::over(window(&self.trailing, &day, LONG_WINDOW_DAYS));
        let events_variance_7d = population_variance(window(&self.trailing, &day, SHORT_WINDOW_DAYS));

        self.lifetime.add(&day);
        self.trailing.push_back(day);
        while self.trailing.len() > CHECKPOINT_TRAILING_DAYS {
            self.trailing.pop_front();
        }

        Ok(RollingRow {
            entity_id: self.entity_id.clone(),
            date: day.date,
            day,
            last_7,
            last_30,
            lifetime: self.lifetime,
            avg_daily_events_7d: last_7.avg_daily_events(),
            avg_daily_events_30d: last_30.avg_daily_events(),
            events_variance_7d,
            events_growth_rate: previous
                .and_then(|p| growth_rate(day.events as f64, p.events as f64)),
            revenue_growth_rate: previous
                .and_then(|p| growth_rate(day.revenue_cents as f64, p.revenue_cents as f64)),
            days_since_previous_activity: previous.map(|p| (day.date - p.date).num_days()),
        })
    }

    /// Lazily pushes each day, yielding one row per day in input order.
    pub fn rows<'a, I>(&'a mut self, days: I) -> impl Iterator<Item = Result<RollingRow>> + 'a
    where
        I: IntoIterator<Item = DailyAggregate>,
        I::IntoIter: 'a,
    {
        days.into_iter().map(move |day| self.push(&day))
    }

    /// Snapshot of the state, or `None` before the first day.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        let last_date_processed = self.last_date()?;
        Some(Checkpoint {
            entity_id: self.entity_id.clone(),
            last_date_processed,
            trailing_daily_values: self.trailing.iter().copied().collect(),
            lifetime: self.lifetime,
            version: CHECKPOINT_VERSION,
        })
    }
}

/// Full recompute over one entity's ordered daily aggregates.
pub fn compute_rolling(days: &[DailyAggregate]) -> Result<Vec<RollingRow>> {
    let Some(first) = days.first() else {
        return Ok(Vec::new());
    };
    let mut state = RollingState::new(first.entity_id.clone());
    days.iter().map(|day| state.push(day)).collect()
}
