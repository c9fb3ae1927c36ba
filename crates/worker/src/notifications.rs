//! Notification worker for admin alerts.

use engine_core::{Error, QualityIssue, QualityReport, QualityStatus, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Invalid event share above which an alert fires.
pub const VALIDATION_ERROR_RATE_THRESHOLD: f64 = 0.1;

/// Notification types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A failed or degraded data quality check
    QualityIssue {
        check: String,
        status: QualityStatus,
        message: String,
    },
    /// Too many invalid events in the latest quality window
    HighValidationErrorRate { error_rate: f64, threshold: f64 },
    /// A feature job run failed
    JobFailed { mode: String, error: String },
}

impl Notification {
    /// One-line human readable text.
    pub fn text(&self) -> String {
        match self {
            Notification::QualityIssue {
                check,
                status,
                message,
            } => format!("[{}] {}: {}", status.as_str(), check, message),
            Notification::HighValidationErrorRate { error_rate, threshold } => format!(
                "High validation error rate: {:.2}% (threshold {:.0}%)",
                error_rate * 100.0,
                threshold * 100.0
            ),
            Notification::JobFailed { mode, error } => format!("Feature job ({}) failed: {}", mode, error),
        }
    }
}

impl From<QualityIssue> for Notification {
    fn from(issue: QualityIssue) -> Self {
        Notification::QualityIssue {
            check: issue.check,
            status: issue.status,
            message: issue.message,
        }
    }
}

/// Notification channel.
#[derive(Debug, Clone)]
pub enum NotificationChannel {
    /// Log only (default)
    Log,
    /// JSON POST of `{"text": ...}`
    Webhook { url: String },
}

/// Notification worker.
pub struct NotificationWorker {
    channels: Vec<NotificationChannel>,
    http: reqwest::Client,
}

impl Default for NotificationWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationWorker {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            channels: vec![NotificationChannel::Log],
            http,
        }
    }

    pub fn with_channel(mut self, channel: NotificationChannel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Log channel plus a webhook when one is configured.
    pub fn from_webhook(url: Option<String>) -> Self {
        match url.filter(|u| !u.trim().is_empty()) {
            Some(url) => Self::new().with_channel(NotificationChannel::Webhook { url }),
            None => Self::new(),
        }
    }

    pub fn channels(&self) -> &[NotificationChannel] {
        &self.channels
    }

    /// Send a notification to every channel.
    pub async fn send(&self, notification: Notification) -> Result<()> {
        for channel in &self.channels {
            match channel {
                NotificationChannel::Log => {
                    info!(notification = ?notification, "Notification");
                }
                NotificationChannel::Webhook { url } => {
                    let body = serde_json::json!({ "text": notification.text() });
                    let response = self
                        .http
                        .post(url)
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| Error::internal(format!("Webhook delivery failed: {}", e)))?;
                    if !response.status().is_success() {
                        warn!(status = %response.status(), "Webhook rejected notification");
                        return Err(Error::internal(format!(
                            "Webhook returned {}",
                            response.status()
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Alerts when the report's invalid event share is above the threshold.
    pub async fn check_and_alert(&self, report: &QualityReport) -> Result<Option<Notification>> {
        let Some(notification) = validation_alert(report.events.total_rows, report.events.invalid_rows) else {
            return Ok(None);
        };
        self.send(notification.clone()).await?;
        Ok(Some(notification))
    }
}

fn validation_alert(received: u64, invalid: u64) -> Option<Notification> {
    if received == 0 {
        return None;
    }
    let error_rate = invalid as f64 / received as f64;
    (error_rate > VALIDATION_ERROR_RATE_THRESHOLD).then_some(Notification::HighValidationErrorRate {
        error_rate,
        threshold: VALIDATION_ERROR_RATE_THRESHOLD,
    })
}
