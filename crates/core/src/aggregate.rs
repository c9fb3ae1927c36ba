//! Daily aggregation of validated events per entity.
//!
//! Aggregation is a single pass with set semantics for distinct counts and
//! integer cents for money, so the result does not depend on event order.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::events::ValidatedEvent;

/// Divides, yielding 0 when the denominator is 0.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Converts integer cents to currency units.
pub fn cents_to_units(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Per-entity, per-day aggregate. Unique per `(entity_id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub entity_id: String,
    pub date: NaiveDate,
    pub total_events: u64,
    pub page_views: u64,
    pub purchases: u64,
    pub signups: u64,
    pub logins: u64,
    pub searches: u64,
    pub clicks: u64,
    /// Purchase revenue in cents
    pub total_revenue_cents: i64,
    /// Purchases with a missing, non-numeric, or negative amount
    pub purchases_without_amount: u64,
    pub unique_event_types: u64,
    pub unique_sessions: u64,
    pub unique_products: u64,
    pub unique_categories: u64,
    // Platform breakdown
    pub web_events: u64,
    pub mobile_events: u64,
    // Device breakdown
    pub desktop_events: u64,
    pub mobile_device_events: u64,
    pub tablet_events: u64,
    /// Invalid records for this entity/day, excluded from every other field
    pub invalid_events: u64,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl DailyAggregate {
    /// An aggregate with all counters at zero.
    pub fn empty(entity_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            entity_id: entity_id.into(),
            date,
            total_events: 0,
            page_views: 0,
            purchases: 0,
            signups: 0,
            logins: 0,
            searches: 0,
            clicks: 0,
            total_revenue_cents: 0,
            purchases_without_amount: 0,
            unique_event_types: 0,
            unique_sessions: 0,
            unique_products: 0,
            unique_categories: 0,
            web_events: 0,
            mobile_events: 0,
            desktop_events: 0,
            mobile_device_events: 0,
            tablet_events: 0,
            invalid_events: 0,
            first_event_at: None,
            last_event_at: None,
        }
    }

    pub fn total_revenue(&self) -> f64 {
        cents_to_units(self.total_revenue_cents)
    }

    pub fn revenue_per_event(&self) -> f64 {
        safe_ratio(self.total_revenue(), self.total_events as f64)
    }

    pub fn events_per_session(&self) -> f64 {
        safe_ratio(self.total_events as f64, self.unique_sessions as f64)
    }

    pub fn avg_order_value(&self) -> f64 {
        safe_ratio(self.total_revenue(), self.purchases as f64)
    }
}

/// Aggregates one entity's events for one day.
///
/// Events for other entities or days are ignored; invalid events only bump
/// `invalid_events`.
pub fn aggregate_day(entity_id: &str, date: NaiveDate, events: &[ValidatedEvent]) -> DailyAggregate {
    let mut agg = DailyAggregate::empty(entity_id, date);
    let mut event_types = BTreeSet::new();
    let mut sessions = BTreeSet::new();
    let mut products = BTreeSet::new();
    let mut categories = BTreeSet::new();

    for validated in events {
        let event = &validated.event;
        if event.entity_id.trim() != entity_id || event.partition_date() != Some(date) {
            continue;
        }
        if !validated.is_valid {
            agg.invalid_events += 1;
            continue;
        }

        agg.total_events += 1;
        let event_type = event.event_type.trim();
        match event_type {
            "page_view" => agg.page_views += 1,
            "signup" => agg.signups += 1,
            "login" => agg.logins += 1,
            "search" => agg.searches += 1,
            "click" => agg.clicks += 1,
            "purchase" => {
                agg.purchases += 1;
                // Negative amounts are not usable revenue; the quality report flags them.
                match event.amount_cents() {
                    Some(cents) if cents >= 0 => {
                        agg.total_revenue_cents = agg.total_revenue_cents.saturating_add(cents)
                    }
                    _ => agg.purchases_without_amount += 1,
                }
            }
            _ => {}
        }
        event_types.insert(event_type.to_string());

        if let Some(session) = event.session() {
            sessions.insert(session.to_string());
        }
        if let Some(product) = event.product_id() {
            products.insert(product);
        }
        if let Some(category) = event.category() {
            categories.insert(category);
        }

        match event.platform_label().as_deref() {
            Some("web") => agg.web_events += 1,
            Some("mobile") => agg.mobile_events += 1,
            _ => {}
        }
        match event.device_label().as_deref() {
            Some("desktop") => agg.desktop_events += 1,
            Some("mobile") => agg.mobile_device_events += 1,
            Some("tablet") => agg.tablet_events += 1,
            _ => {}
        }

        if let Some(ts) = event.timestamp {
            agg.first_event_at = Some(agg.first_event_at.map_or(ts, |first| first.min(ts)));
            agg.last_event_at = Some(agg.last_event_at.map_or(ts, |last| last.max(ts)));
        }
    }

    agg.unique_event_types = event_types.len() as u64;
    agg.unique_sessions = sessions.len() as u64;
    agg.unique_products = products.len() as u64;
    agg.unique_categories = categories.len() as u64;
    agg
}

/// Groups events by `(entity_id, date)` and aggregates each group.
///
/// Output is ordered by entity then date. Groups with no valid events are
/// skipped: they carry no activity and would shift row-based windows.
pub fn build_daily_aggregates(events: &[ValidatedEvent]) -> Vec<DailyAggregate> {
    let mut groups: BTreeMap<(String, NaiveDate), Vec<ValidatedEvent>> = BTreeMap::new();

    for validated in events {
        let entity_id = validated.event.entity_id.trim();
        let Some(date) = validated.event.partition_date() else {
            continue;
        };
        if entity_id.is_empty() {
            continue;
        }
        groups
            .entry((entity_id.to_string(), date))
            .or_default()
            .push(validated.clone());
    }

    groups
        .into_iter()
        .map(|((entity_id, date), group)| aggregate_day(&entity_id, date, &group))
        .filter(|agg| agg.total_events > 0)
        .collect()
}
