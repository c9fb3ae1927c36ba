//! Scores and segments derived from a rolling row.
//!
//! Everything here is a pure function of one row, the entity's profile, and
//! an explicit reference time. Thresholds and weights live in [`crate::limits`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{cents_to_units, safe_ratio};
use crate::events::EntityProfile;
use crate::limits::{
    ENGAGEMENT_30D_WEIGHTS, ENGAGEMENT_7D_WEIGHTS, ESTABLISHED_MAX_DAYS, FREQUENT_BUYER_PURCHASES,
    HIGH_VALUE_REVENUE, MAX_ENGAGEMENT_SCORE, MEDIUM_VALUE_REVENUE, NEW_MAX_DAYS, RECENT_MAX_DAYS,
};
use crate::rolling::RollingRow;

/// Reference time for recency features. Never read from the wall clock
/// inside derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureContext {
    pub as_of: DateTime<Utc>,
}

impl FeatureContext {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self { as_of }
    }

    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of.date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTier {
    NoRevenue,
    LowValue,
    MediumValue,
    HighValue,
}

impl ValueTier {
    pub fn from_lifetime_revenue(revenue: f64) -> Self {
        if revenue >= HIGH_VALUE_REVENUE {
            Self::HighValue
        } else if revenue >= MEDIUM_VALUE_REVENUE {
            Self::MediumValue
        } else if revenue > 0.0 {
            Self::LowValue
        } else {
            Self::NoRevenue
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRevenue => "no_revenue",
            Self::LowValue => "low_value",
            Self::MediumValue => "medium_value",
            Self::HighValue => "high_value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    New,
    Recent,
    Established,
    Mature,
}

impl LifecycleStage {
    pub fn from_days_since_registration(days: i64) -> Self {
        if days <= NEW_MAX_DAYS {
            Self::New
        } else if days <= RECENT_MAX_DAYS {
            Self::Recent
        } else if days <= ESTABLISHED_MAX_DAYS {
            Self::Established
        } else {
            Self::Mature
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Recent => "recent",
            Self::Established => "established",
            Self::Mature => "mature",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChurnRiskStatus {
    Active,
    AtRisk,
    Churned,
    Inactive,
}

impl ChurnRiskStatus {
    /// First match wins: at_risk, churned, active, inactive.
    pub fn classify(events_7d: u64, events_30d: u64, lifetime_events: u64) -> Self {
        if events_7d == 0 && events_30d > 0 {
            Self::AtRisk
        } else if events_30d == 0 && lifetime_events > 0 {
            Self::Churned
        } else if events_7d > 0 {
            Self::Active
        } else {
            Self::Inactive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::AtRisk => "at_risk",
            Self::Churned => "churned",
            Self::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorType {
    FrequentBuyer,
    Buyer,
    Browser,
    Casual,
    Dormant,
}

impl BehaviorType {
    pub fn classify(purchases_30d: u64, page_views_30d: u64, events_30d: u64) -> Self {
        if purchases_30d >= FREQUENT_BUYER_PURCHASES as u64 {
            Self::FrequentBuyer
        } else if purchases_30d >= 1 {
            Self::Buyer
        } else if events_30d > 0 && page_views_30d.saturating_mul(2) >= events_30d {
            Self::Browser
        } else if events_30d > 0 {
            Self::Casual
        } else {
            Self::Dormant
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrequentBuyer => "frequent_buyer",
            Self::Buyer => "buyer",
            Self::Browser => "browser",
            Self::Casual => "casual",
            Self::Dormant => "dormant",
        }
    }
}

/// Weighted sum of window activity, clamped to `[0, 100]`.
pub fn engagement_score(weights: (i64, i64, i64), events: u64, purchases: u64, sessions: u64) -> u8 {
    let to_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
    let raw = to_i64(events)
        .saturating_mul(weights.0)
        .saturating_add(to_i64(purchases).saturating_mul(weights.1))
        .saturating_add(to_i64(sessions).saturating_mul(weights.2));
    raw.clamp(0, MAX_ENGAGEMENT_SCORE) as u8
}

/// `2 * min(web, mobile) / (web + mobile)`, or 0 with no platform events.
pub fn platform_diversity(web_events: u64, mobile_events: u64) -> f64 {
    let total = web_events.saturating_add(mobile_events);
    safe_ratio(2.0 * web_events.min(mobile_events) as f64, total as f64)
}

/// One entity's complete feature set for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub entity_id: String,
    pub feature_date: NaiveDate,

    pub events_today: u64,
    pub purchases_today: u64,
    pub revenue_today: f64,
    pub sessions_today: u64,

    pub events_last_7_days: u64,
    pub purchases_last_7_days: u64,
    pub revenue_last_7_days: f64,
    pub sessions_last_7_days: u64,
    pub active_days_last_7: u64,

    pub events_last_30_days: u64,
    pub purchases_last_30_days: u64,
    pub revenue_last_30_days: f64,
    pub sessions_last_30_days: u64,
    pub page_views_last_30_days: u64,
    pub web_events_last_30_days: u64,
    pub mobile_events_last_30_days: u64,
    pub active_days_last_30: u64,

    pub lifetime_events: u64,
    pub lifetime_purchases: u64,
    pub lifetime_revenue: f64,
    pub lifetime_sessions: u64,
    pub lifetime_active_days: u64,

    pub avg_daily_events_7d: f64,
    pub avg_daily_events_30d: f64,
    pub events_variance_7d: f64,
    pub events_growth_rate: Option<f64>,
    pub revenue_growth_rate: Option<f64>,
    pub days_since_previous_activity: Option<i64>,
    pub avg_order_value_30d: f64,

    pub engagement_score_7d: u8,
    pub engagement_score_30d: u8,
    pub platform_diversity_score: f64,

    pub value_tier: ValueTier,
    pub lifecycle_stage: LifecycleStage,
    pub churn_risk_status: ChurnRiskStatus,
    pub behavior_type: BehaviorType,

    pub days_since_registration: i64,
    pub days_since_last_activity: i64,
    /// `YYYY-MM` of registration, or of first activity without a profile
    pub cohort_month: String,
    pub country: Option<String>,
    pub subscription_tier: Option<String>,
}

/// Derives the feature row for one rolling row.
pub fn derive(row: &RollingRow, profile: Option<&EntityProfile>, ctx: &FeatureContext) -> FeatureRow {
    let registered_on = profile
        .map(|p| p.registered_on)
        .or(row.lifetime.first_active_date)
        .unwrap_or(row.date);
    let days_since_registration = (row.date - registered_on).num_days().max(0);

    let (w7, w30, life) = (&row.last_7, &row.last_30, &row.lifetime);
    let lifetime_revenue = cents_to_units(life.revenue_cents);
    let revenue_30d = cents_to_units(w30.revenue_cents);

    FeatureRow {
        entity_id: row.entity_id.clone(),
        feature_date: row.date,

        events_today: row.day.events,
        purchases_today: row.day.purchases,
        revenue_today: cents_to_units(row.day.revenue_cents),
        sessions_today: row.day.sessions,

        events_last_7_days: w7.events,
        purchases_last_7_days: w7.purchases,
        revenue_last_7_days: cents_to_units(w7.revenue_cents),
        sessions_last_7_days: w7.sessions,
        active_days_last_7: w7.rows,

        events_last_30_days: w30.events,
        purchases_last_30_days: w30.purchases,
        revenue_last_30_days: revenue_30d,
        sessions_last_30_days: w30.sessions,
        page_views_last_30_days: w30.page_views,
        web_events_last_30_days: w30.web_events,
        mobile_events_last_30_days: w30.mobile_events,
        active_days_last_30: w30.rows,

        lifetime_events: life.events,
        lifetime_purchases: life.purchases,
        lifetime_revenue,
        lifetime_sessions: life.sessions,
        lifetime_active_days: life.active_days,

        avg_daily_events_7d: row.avg_daily_events_7d,
        avg_daily_events_30d: row.avg_daily_events_30d,
        events_variance_7d: row.events_variance_7d,
        events_growth_rate: row.events_growth_rate,
        revenue_growth_rate: row.revenue_growth_rate,
        days_since_previous_activity: row.days_since_previous_activity,
        avg_order_value_30d: safe_ratio(revenue_30d, w30.purchases as f64),

        engagement_score_7d: engagement_score(ENGAGEMENT_7D_WEIGHTS, w7.events, w7.purchases, w7.sessions),
        engagement_score_30d: engagement_score(
            ENGAGEMENT_30D_WEIGHTS,
            w30.events,
            w30.purchases,
            w30.sessions,
        ),
        platform_diversity_score: platform_diversity(w30.web_events, w30.mobile_events),

        value_tier: ValueTier::from_lifetime_revenue(lifetime_revenue),
        lifecycle_stage: LifecycleStage::from_days_since_registration(days_since_registration),
        churn_risk_status: ChurnRiskStatus::classify(w7.events, w30.events, life.events),
        behavior_type: BehaviorType::classify(w30.purchases, w30.page_views, w30.events),

        days_since_registration,
        days_since_last_activity: (ctx.as_of_date() - row.date).num_days().max(0),
        cohort_month: registered_on.format("%Y-%m").to_string(),
        country: profile.and_then(|p| p.country.clone()),
        subscription_tier: profile.and_then(|p| p.subscription_tier.clone()),
    }
}
