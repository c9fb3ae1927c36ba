//! Persisted rolling state for incremental runs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limits::{CHECKPOINT_TRAILING_DAYS, CHECKPOINT_VERSION};
use crate::rolling::{DailyValues, LifetimeTotals};

/// Minimal state needed to resume an entity's rolling computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub entity_id: String,
    pub last_date_processed: NaiveDate,
    /// Raw values for the last active days, ascending by date
    pub trailing_daily_values: Vec<DailyValues>,
    pub lifetime: LifetimeTotals,
    pub version: u32,
}

impl Checkpoint {
    /// Decodes a stored checkpoint. Any decode failure is treated as corruption.
    pub fn from_json(entity_id: &str, json: &str) -> Result<Self> {
        let checkpoint: Self = serde_json::from_str(json)
            .map_err(|e| Error::checkpoint_corrupt(entity_id, format!("decode failed: {e}")))?;
        if checkpoint.entity_id != entity_id {
            return Err(Error::checkpoint_corrupt(
                entity_id,
                format!("stored for entity '{}'", checkpoint.entity_id),
            ));
        }
        checkpoint.verify()?;
        Ok(checkpoint)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Checks the structural invariants a resumable checkpoint must hold.
    pub fn verify(&self) -> Result<()> {
        let corrupt = |reason: String| Err(Error::checkpoint_corrupt(&self.entity_id, reason));

        if self.version != CHECKPOINT_VERSION {
            return corrupt(format!("unsupported version {}", self.version));
        }
        if self.entity_id.trim().is_empty() {
            return corrupt("empty entity id".into());
        }
        if self.trailing_daily_values.len() > CHECKPOINT_TRAILING_DAYS {
            return corrupt(format!(
                "{} trailing values, at most {} allowed",
                self.trailing_daily_values.len(),
                CHECKPOINT_TRAILING_DAYS
            ));
        }
        let Some(last) = self.trailing_daily_values.last() else {
            return corrupt("no trailing values".into());
        };
        if last.date != self.last_date_processed {
            return corrupt(format!(
                "last trailing date {} differs from last processed date {}",
                last.date, self.last_date_processed
            ));
        }
        if self
            .trailing_daily_values
            .windows(2)
            .any(|pair| pair[0].date >= pair[1].date)
        {
            return corrupt("trailing dates not strictly ascending".into());
        }

        let mut events = 0u64;
        let mut purchases = 0u64;
        let mut revenue_cents = 0i64;
        let mut sessions = 0u64;
        for day in &self.trailing_daily_values {
            let sums = (
                events.checked_add(day.events),
                purchases.checked_add(day.purchases),
                revenue_cents.checked_add(day.revenue_cents),
                sessions.checked_add(day.sessions),
            );
            let (Some(e), Some(p), Some(r), Some(s)) = sums else {
                return corrupt("trailing sums overflow".into());
            };
            (events, purchases, revenue_cents, sessions) = (e, p, r, s);
        }
        let lifetime = &self.lifetime;
        if lifetime.events < events
            || lifetime.purchases < purchases
            || lifetime.revenue_cents < revenue_cents
            || lifetime.sessions < sessions
            || lifetime.active_days < self.trailing_daily_values.len() as u64
        {
            return corrupt("lifetime totals smaller than trailing sums".into());
        }
        match lifetime.first_active_date {
            Some(first) if first <= self.trailing_daily_values[0].date => Ok(()),
            _ => corrupt("first active date missing or after trailing values".into()),
        }
    }
}
