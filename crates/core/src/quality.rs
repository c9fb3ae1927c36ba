//! Data-quality report over one batch of validated records.
//!
//! Findings are observability, never errors: invalid rows, stale data, and
//! business-rule violations all end up as checks with a status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::events::{ValidatedEvent, ValidatedUser};
use crate::features::FeatureContext;
use crate::limits::{FRESHNESS_MAX_HOURS, KNOWN_EVENT_TYPES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    Success,
    Warning,
    Error,
}

impl QualityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Valid/invalid counts for one record kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub table: String,
    pub total_rows: u64,
    pub valid_rows: u64,
    pub invalid_rows: u64,
    /// 100.0 for an empty table
    pub validity_pct: f64,
    pub violations_by_rule: BTreeMap<String, u64>,
}

impl ValidationSummary {
    fn from_outcomes<'a>(table: &str, outcomes: impl Iterator<Item = (bool, &'a [String])>) -> Self {
        let mut summary = Self {
            table: table.to_string(),
            total_rows: 0,
            valid_rows: 0,
            invalid_rows: 0,
            validity_pct: 100.0,
            violations_by_rule: BTreeMap::new(),
        };
        for (is_valid, errors) in outcomes {
            summary.total_rows += 1;
            if is_valid {
                summary.valid_rows += 1;
            } else {
                summary.invalid_rows += 1;
            }
            for rule in errors {
                *summary.violations_by_rule.entry(rule.clone()).or_default() += 1;
            }
        }
        if summary.total_rows > 0 {
            let pct = summary.valid_rows as f64 * 100.0 / summary.total_rows as f64;
            summary.validity_pct = (pct * 100.0).round() / 100.0;
        }
        summary
    }

    pub fn status(&self) -> QualityStatus {
        if self.invalid_rows > 0 {
            QualityStatus::Warning
        } else {
            QualityStatus::Success
        }
    }
}

/// Violation count for one business rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRuleCheck {
    pub rule: String,
    pub violations: u64,
}

impl BusinessRuleCheck {
    pub fn status(&self) -> QualityStatus {
        if self.violations > 0 {
            QualityStatus::Warning
        } else {
            QualityStatus::Success
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessCheck {
    pub latest_event_at: Option<DateTime<Utc>>,
    pub hours_since_latest: Option<f64>,
    pub status: QualityStatus,
}

impl FreshnessCheck {
    fn evaluate(latest_event_at: Option<DateTime<Utc>>, ctx: &FeatureContext) -> Self {
        let Some(latest) = latest_event_at else {
            return Self {
                latest_event_at: None,
                hours_since_latest: None,
                status: QualityStatus::Error,
            };
        };
        let age = ctx.as_of - latest;
        let status = if age > chrono::Duration::hours(FRESHNESS_MAX_HOURS) {
            QualityStatus::Warning
        } else {
            QualityStatus::Success
        };
        Self {
            latest_event_at: Some(latest),
            hours_since_latest: Some(age.num_seconds() as f64 / 3600.0),
            status,
        }
    }
}

/// A single non-success check, ready for alerting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub check: String,
    pub status: QualityStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub generated_at: DateTime<Utc>,
    pub events: ValidationSummary,
    pub users: ValidationSummary,
    pub business_rules: Vec<BusinessRuleCheck>,
    pub purchases_without_amount: u64,
    pub freshness: FreshnessCheck,
}

impl QualityReport {
    pub fn build(events: &[ValidatedEvent], users: &[ValidatedUser], ctx: &FeatureContext) -> Self {
        let mut future_timestamps = 0u64;
        let mut unknown_event_types = 0u64;
        let mut negative_amounts = 0u64;
        let mut amounts_out_of_range = 0u64;
        let mut purchases_without_amount = 0u64;
        let mut seen_ids: HashMap<&str, u64> = HashMap::new();
        let mut latest: Option<DateTime<Utc>> = None;

        for validated in events {
            let event = &validated.event;
            let id = event.event_id.trim();
            if !id.is_empty() {
                *seen_ids.entry(id).or_default() += 1;
            }
            if !validated.is_valid {
                continue;
            }

            if let Some(ts) = event.timestamp {
                if ts > ctx.as_of {
                    future_timestamps += 1;
                } else {
                    latest = Some(latest.map_or(ts, |l| l.max(ts)));
                }
            }
            if !KNOWN_EVENT_TYPES.contains(&event.event_type.trim()) {
                unknown_event_types += 1;
            }
            if event.is_purchase() {
                match event.amount_cents() {
                    Some(cents) if cents < 0 => {
                        negative_amounts += 1;
                        purchases_without_amount += 1;
                    }
                    Some(_) => {}
                    None => {
                        if event.amount().is_some() {
                            amounts_out_of_range += 1;
                        }
                        purchases_without_amount += 1;
                    }
                }
            }
        }

        let duplicate_event_ids = seen_ids.values().map(|n| n.saturating_sub(1)).sum();

        Self {
            generated_at: ctx.as_of,
            events: ValidationSummary::from_outcomes(
                "raw_events",
                events.iter().map(|e| (e.is_valid, e.validation_errors.as_slice())),
            ),
            users: ValidationSummary::from_outcomes(
                "raw_users",
                users.iter().map(|u| (u.is_valid, u.validation_errors.as_slice())),
            ),
            business_rules: vec![
                BusinessRuleCheck {
                    rule: "future_timestamp".into(),
                    violations: future_timestamps,
                },
                BusinessRuleCheck {
                    rule: "unknown_event_type".into(),
                    violations: unknown_event_types,
                },
                BusinessRuleCheck {
                    rule: "negative_amount".into(),
                    violations: negative_amounts,
                },
                BusinessRuleCheck {
                    rule: "amount_out_of_range".into(),
                    violations: amounts_out_of_range,
                },
                BusinessRuleCheck {
                    rule: "duplicate_event_id".into(),
                    violations: duplicate_event_ids,
                },
            ],
            purchases_without_amount,
            freshness: FreshnessCheck::evaluate(latest, ctx),
        }
    }

    /// Worst status across all checks.
    pub fn status(&self) -> QualityStatus {
        self.issues()
            .iter()
            .map(|issue| issue.status)
            .max()
            .unwrap_or(QualityStatus::Success)
    }

    pub fn issues(&self) -> Vec<QualityIssue> {
        let mut issues = Vec::new();

        for summary in [&self.events, &self.users] {
            if summary.status() != QualityStatus::Success {
                issues.push(QualityIssue {
                    check: format!("validation:{}", summary.table),
                    status: summary.status(),
                    message: format!(
                        "{} of {} rows invalid ({:.2}% valid)",
                        summary.invalid_rows, summary.total_rows, summary.validity_pct
                    ),
                });
            }
        }

        for rule in &self.business_rules {
            if rule.status() != QualityStatus::Success {
                issues.push(QualityIssue {
                    check: format!("business_rule:{}", rule.rule),
                    status: rule.status(),
                    message: format!("{} violations", rule.violations),
                });
            }
        }

        if self.purchases_without_amount > 0 {
            issues.push(QualityIssue {
                check: "purchases_without_amount".into(),
                status: QualityStatus::Warning,
                message: format!("{} purchases without a usable amount", self.purchases_without_amount),
            });
        }

        match (self.freshness.status, self.freshness.hours_since_latest) {
            (QualityStatus::Success, _) => {}
            (status, Some(hours)) => issues.push(QualityIssue {
                check: "freshness".into(),
                status,
                message: format!("latest event is {hours:.1} hours old"),
            }),
            (status, None) => issues.push(QualityIssue {
                check: "freshness".into(),
                status,
                message: "no events found".into(),
            }),
        }

        issues
    }
}
