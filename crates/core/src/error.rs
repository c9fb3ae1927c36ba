//! Unified error types for the feature engine.
//!
//! Error codes:
//! - VALID_001-002: Request validation errors
//! - ORDER_001: Out-of-order input for a rolling state
//! - CKPT_001-002: Checkpoint errors (recoverable by full recompute)
//! - DB_001-002: Warehouse errors

use chrono::NaiveDate;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorCode {
    /// VALID_001: Invalid JSON / Invalid format
    InvalidFormat,
    /// VALID_002: Request exceeds size or event limits
    BatchTooLarge,
}

impl ValidationErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "VALID_001",
            Self::BatchTooLarge => "VALID_002",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidFormat => 400,
            Self::BatchTooLarge => 413,
        }
    }
}

/// Database error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorCode {
    /// DB_001: Failed to store rows
    StoreFailed,
    /// DB_002: Failed to read rows
    QueryFailed,
}

impl DbErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreFailed => "DB_001",
            Self::QueryFailed => "DB_002",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        500
    }
}

/// Unified error type for the feature engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Validation error with code.
    #[error("[{code}] {message}")]
    ValidationWithCode {
        code: &'static str,
        message: String,
        http_status: u16,
    },

    /// Database error with code.
    #[error("[{code}] {message}")]
    Database {
        code: &'static str,
        message: String,
        http_status: u16,
    },

    /// A day arrived at or before the last processed day for an entity.
    #[error("[ORDER_001] {entity_id}: day {date} is not after last processed day {last_date}")]
    OutOfOrder {
        entity_id: String,
        date: NaiveDate,
        last_date: NaiveDate,
    },

    /// Entity has earlier history but no checkpoint was supplied.
    #[error("[CKPT_001] {entity_id}: checkpoint missing for entity with prior history")]
    CheckpointMissing { entity_id: String },

    /// Checkpoint failed to decode or violates its invariants.
    #[error("[CKPT_002] {entity_id}: corrupt checkpoint: {reason}")]
    CheckpointCorrupt { entity_id: String, reason: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with code.
    pub fn validation_code(code: ValidationErrorCode, msg: impl Into<String>) -> Self {
        Self::ValidationWithCode {
            code: code.code(),
            message: msg.into(),
            http_status: code.http_status(),
        }
    }

    /// Create a database error.
    pub fn database(code: DbErrorCode, msg: impl Into<String>) -> Self {
        Self::Database {
            code: code.code(),
            message: msg.into(),
            http_status: code.http_status(),
        }
    }

    pub fn out_of_order(entity_id: impl Into<String>, date: NaiveDate, last_date: NaiveDate) -> Self {
        Self::OutOfOrder {
            entity_id: entity_id.into(),
            date,
            last_date,
        }
    }

    pub fn checkpoint_missing(entity_id: impl Into<String>) -> Self {
        Self::CheckpointMissing {
            entity_id: entity_id.into(),
        }
    }

    pub fn checkpoint_corrupt(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CheckpointCorrupt {
            entity_id: entity_id.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller should rebuild this entity from full history.
    pub fn requires_full_recompute(&self) -> bool {
        matches!(
            self,
            Self::CheckpointMissing { .. } | Self::CheckpointCorrupt { .. }
        )
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ValidationWithCode { http_status, .. } => *http_status,
            Self::Database { http_status, .. } => *http_status,
            Self::OutOfOrder { .. } => 422,
            Self::CheckpointMissing { .. } => 409,
            Self::CheckpointCorrupt { .. } => 409,
            Self::Validation(_) => 400,
            Self::Serialization(_) => 400,
            Self::Config(_) => 500,
            Self::Internal(_) => 500,
        }
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::ValidationWithCode { code, .. } => Some(code),
            Self::Database { code, .. } => Some(code),
            Self::OutOfOrder { .. } => Some("ORDER_001"),
            Self::CheckpointMissing { .. } => Some("CKPT_001"),
            Self::CheckpointCorrupt { .. } => Some("CKPT_002"),
            _ => None,
        }
    }
}
