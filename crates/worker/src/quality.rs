//! Periodic data quality monitor.

use chrono::{DateTime, Duration, Utc};
use clickhouse_client::{DateRange, Warehouse};
use engine_core::{validate_events, validate_users, FeatureContext, QualityReport, QualityStatus, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::notifications::{Notification, NotificationWorker};

/// Builds a quality report over the most recent raw data, stores it, and
/// raises a notification per failing check.
pub struct QualityMonitor {
    warehouse: Arc<dyn Warehouse>,
    notifier: Arc<NotificationWorker>,
}

impl QualityMonitor {
    pub fn new(warehouse: Arc<dyn Warehouse>, notifier: Arc<NotificationWorker>) -> Self {
        Self { warehouse, notifier }
    }

    pub fn notifier(&self) -> &Arc<NotificationWorker> {
        &self.notifier
    }

    /// Checks yesterday and today (UTC) as of `as_of`.
    pub async fn run(&self, as_of: DateTime<Utc>) -> Result<QualityReport> {
        let today = as_of.date_naive();
        let raw_events = self
            .warehouse
            .fetch_events(DateRange::between(today - Duration::days(1), today), None)
            .await?;
        let entity_ids: Vec<String> = raw_events
            .iter()
            .map(|e| e.entity_id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let raw_users = self.warehouse.fetch_users(&entity_ids).await?;

        let report = QualityReport::build(
            &validate_events(raw_events),
            &validate_users(raw_users),
            &FeatureContext::new(as_of),
        );
        self.warehouse.store_quality_report(&report).await?;

        let status = report.status();
        info!(
            status = status.as_str(),
            events = report.events.total_rows,
            validity_pct = report.events.validity_pct,
            "Quality check finished"
        );

        if status != QualityStatus::Success {
            for issue in report.issues() {
                let notification = Notification::from(issue);
                if let Err(e) = self.notifier.send(notification).await {
                    warn!(error = %e, "Failed to deliver quality notification");
                }
            }
        }

        Ok(report)
    }
}
