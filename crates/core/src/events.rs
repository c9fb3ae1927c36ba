//! Raw record types supplied by the event store.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

use crate::limits::{MAX_AMOUNT_CENTS, MAX_METADATA_BYTES};

/// Validates metadata JSON size.
fn validate_metadata_size(metadata: &Value) -> Result<(), ValidationError> {
    // Fast path: null/empty
    if metadata.is_null() {
        return Ok(());
    }

    let size = serde_json::to_vec(metadata).map(|v| v.len()).unwrap_or(0);

    if size > MAX_METADATA_BYTES {
        let mut err = ValidationError::new("metadata_too_large");
        err.message = Some(
            format!(
                "metadata {}KB exceeds {}KB limit",
                size / 1024,
                MAX_METADATA_BYTES / 1024
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Parses the timestamp shapes upstream producers emit.
///
/// Accepts RFC 3339, naive ISO-8601 (assumed UTC), and Unix milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                        .ok()
                        .map(|naive| naive.and_utc())
                })
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Unparseable timestamps become `None` so the validator can report them.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

/// Looks up a metadata key. Metadata may be an object or a JSON-encoded string.
fn metadata_field(metadata: &Value, key: &str) -> Option<Value> {
    match metadata {
        Value::Object(map) => map.get(key).cloned(),
        Value::String(encoded) => serde_json::from_str::<Value>(encoded)
            .ok()
            .and_then(|decoded| decoded.get(key).cloned()),
        _ => None,
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// A raw behavioral event as stored by the event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RawEvent {
    /// Unique event ID
    #[serde(default)]
    #[validate(length(max = 128, code = "event_id_too_long"))]
    pub event_id: String,
    /// Entity (user) the event belongs to
    #[serde(default, alias = "user_id")]
    #[validate(length(max = 128, code = "entity_id_too_long"))]
    pub entity_id: String,
    #[serde(default)]
    #[validate(length(max = 64, code = "event_type_too_long"))]
    pub event_type: String,
    /// Primary timestamp; drives the partition date
    #[serde(default, alias = "event_timestamp", deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    #[validate(length(max = 128, code = "session_id_too_long"))]
    pub session_id: Option<String>,
    /// web / mobile
    #[serde(default)]
    #[validate(length(max = 64, code = "platform_too_long"))]
    pub platform: Option<String>,
    /// desktop / mobile / tablet
    #[serde(default)]
    #[validate(length(max = 64, code = "device_type_too_long"))]
    pub device_type: Option<String>,
    /// Opaque key-value metadata
    #[serde(default)]
    #[validate(custom(function = "validate_metadata_size"))]
    pub metadata: Value,
}

impl RawEvent {
    /// Creates an event with no session, platform, device, or metadata.
    pub fn new(
        event_id: impl Into<String>,
        entity_id: impl Into<String>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            entity_id: entity_id.into(),
            event_type: event_type.into(),
            timestamp: Some(timestamp),
            session_id: None,
            platform: None,
            device_type: None,
            metadata: Value::Null,
        }
    }

    /// UTC calendar day of the primary timestamp.
    pub fn partition_date(&self) -> Option<NaiveDate> {
        self.timestamp.map(|ts| ts.date_naive())
    }

    pub fn is_purchase(&self) -> bool {
        self.event_type.trim() == "purchase"
    }

    pub fn session(&self) -> Option<&str> {
        non_empty(self.session_id.as_ref())
    }

    /// Lowercased platform label.
    pub fn platform_label(&self) -> Option<String> {
        non_empty(self.platform.as_ref()).map(str::to_lowercase)
    }

    /// Lowercased device type label.
    pub fn device_label(&self) -> Option<String> {
        non_empty(self.device_type.as_ref()).map(str::to_lowercase)
    }

    /// The numeric `amount` metadata field, whatever its magnitude.
    pub fn amount(&self) -> Option<f64> {
        let amount = match metadata_field(&self.metadata, "amount")? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        amount.is_finite().then_some(amount)
    }

    /// Monetary amount in cents, if the metadata carries a usable one.
    ///
    /// Amounts beyond [`MAX_AMOUNT_CENTS`] in either direction are not usable.
    pub fn amount_cents(&self) -> Option<i64> {
        let cents = (self.amount()? * 100.0).round();
        if cents.abs() > MAX_AMOUNT_CENTS as f64 {
            return None;
        }
        Some(cents as i64)
    }

    pub fn product_id(&self) -> Option<String> {
        self.metadata_string("product_id")
    }

    pub fn category(&self) -> Option<String> {
        self.metadata_string("category")
    }

    fn metadata_string(&self, key: &str) -> Option<String> {
        match metadata_field(&self.metadata, key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }
}

/// A raw user (entity) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RawUser {
    #[serde(default, alias = "user_id")]
    #[validate(length(max = 128, code = "entity_id_too_long"))]
    pub entity_id: String,
    #[serde(default)]
    #[validate(length(max = 254, code = "email_too_long"))]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[validate(length(max = 64, code = "country_too_long"))]
    pub country: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default, alias = "tier")]
    #[validate(length(max = 64, code = "subscription_tier_too_long"))]
    pub subscription_tier: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_metadata_size"))]
    pub metadata: Value,
}

impl RawUser {
    pub fn new(entity_id: impl Into<String>, email: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            email: Some(email.into()),
            created_at: Some(created_at),
            updated_at: None,
            country: None,
            timezone: None,
            subscription_tier: None,
            metadata: Value::Null,
        }
    }

    /// UTC calendar day of the creation timestamp.
    pub fn partition_date(&self) -> Option<NaiveDate> {
        self.created_at.map(|ts| ts.date_naive())
    }
}

/// A raw event with its validation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedEvent {
    #[serde(flatten)]
    pub event: RawEvent,
    pub is_valid: bool,
    /// Every violated rule, in rule order
    pub validation_errors: Vec<String>,
}

/// A raw user with its validation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedUser {
    #[serde(flatten)]
    pub user: RawUser,
    pub is_valid: bool,
    pub validation_errors: Vec<String>,
}

/// The part of a user record feature derivation needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub entity_id: String,
    pub registered_on: NaiveDate,
    pub country: Option<String>,
    pub subscription_tier: Option<String>,
}

impl EntityProfile {
    /// Builds a profile from a valid user record.
    pub fn from_validated(user: &ValidatedUser) -> Option<Self> {
        if !user.is_valid {
            return None;
        }
        Some(Self {
            entity_id: user.user.entity_id.trim().to_string(),
            registered_on: user.user.partition_date()?,
            country: non_empty(user.user.country.as_ref()).map(str::to_string),
            subscription_tier: non_empty(user.user.subscription_tier.as_ref()).map(str::to_string),
        })
    }
}
