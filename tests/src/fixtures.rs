//! Test fixtures and record generators.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use engine_core::{RawEvent, RawUser};
use uuid::Uuid;

/// Midday UTC on the given date.
pub fn at(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).unwrap())
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A valid event with a unique ID.
pub fn event(entity_id: &str, event_type: &str, ts: DateTime<Utc>) -> RawEvent {
    let mut event = RawEvent::new(Uuid::new_v4().to_string(), entity_id, event_type, ts);
    event.session_id = Some(format!("{}-{}", entity_id, ts.date_naive()));
    event.platform = Some("web".to_string());
    event
}

/// A purchase carrying `amount` in currency units.
pub fn purchase(entity_id: &str, ts: DateTime<Utc>, amount: f64) -> RawEvent {
    let mut event = event(entity_id, "purchase", ts);
    event.metadata = serde_json::json!({ "amount": amount, "product_id": "sku-1" });
    event
}

/// A purchase with no amount field.
pub fn purchase_without_amount(entity_id: &str, ts: DateTime<Utc>) -> RawEvent {
    event(entity_id, "purchase", ts)
}

/// An event that fails validation (no entity).
pub fn invalid_event(ts: DateTime<Utc>) -> RawEvent {
    RawEvent::new(Uuid::new_v4().to_string(), "", "page_view", ts)
}

/// `count` page views on `day`.
pub fn page_views(entity_id: &str, day: NaiveDate, count: usize) -> Vec<RawEvent> {
    (0..count).map(|i| event(entity_id, "page_view", at(day, 8 + (i % 12) as u32))).collect()
}

/// `per_day` page views plus one $10 purchase on each of `days` consecutive
/// days starting at `start`.
pub fn history(entity_id: &str, start: NaiveDate, days: i64, per_day: usize) -> Vec<RawEvent> {
    (0..days)
        .flat_map(|offset| {
            let day = start + Duration::days(offset);
            let mut events = page_views(entity_id, day, per_day);
            events.push(purchase(entity_id, at(day, 20), 10.0));
            events
        })
        .collect()
}

/// A valid user registered on `registered`.
pub fn user(entity_id: &str, registered: NaiveDate) -> RawUser {
    let mut user = RawUser::new(entity_id, format!("{}@example.com", entity_id.to_lowercase()), at(registered, 9));
    user.country = Some("US".to_string());
    user.subscription_tier = Some("free".to_string());
    user
}

/// The `U1` example: 3 events on day 1, then 5 events including a $20
/// purchase on day 2.
pub fn two_day_example() -> Vec<RawEvent> {
    let day1 = date(2024, 3, 1);
    let day2 = date(2024, 3, 2);
    let mut events = page_views("U1", day1, 3);
    events.extend(page_views("U1", day2, 4));
    events.push(purchase("U1", at(day2, 21), 20.0));
    events
}
