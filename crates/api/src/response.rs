//! Standardized API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine_core::{Checkpoint, DailyAggregate, FeatureRow, QualityReport};
use serde::{Deserialize, Serialize};
use worker::{BatchOutput, EntityFailure};

/// Result of a stateless compute request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComputeResponse {
    pub rows: Vec<FeatureRow>,
    pub checkpoints: Vec<Checkpoint>,
    pub daily_aggregates: Vec<DailyAggregate>,
    pub quality: QualityReport,
    pub failures: Vec<EntityFailure>,
}

impl From<BatchOutput> for ComputeResponse {
    fn from(output: BatchOutput) -> Self {
        let mut rows = Vec::with_capacity(output.row_count());
        let mut checkpoints = Vec::with_capacity(output.entities.len());
        for entity in output.entities {
            rows.extend(entity.rows);
            checkpoints.extend(entity.checkpoint);
        }
        Self {
            rows,
            checkpoints,
            daily_aggregates: output.daily_aggregates,
            quality: output.quality,
            failures: output.failures,
        }
    }
}

/// Feature rows stored for one entity.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntityFeaturesResponse {
    pub entity_id: String,
    pub rows: Vec<FeatureRow>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub clickhouse_connected: bool,
    pub feature_job_healthy: bool,
    pub last_job_rows: u64,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = Some(details);
        self
    }
}

/// API error type with engine error codes.
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "VALID_001", msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg)
    }

    pub fn validation(status: StatusCode, code: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new("Validation failed", code).with_details(errors),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<engine_core::Error> for ApiError {
    fn from(err: engine_core::Error) -> Self {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match &err {
            engine_core::Error::ValidationWithCode { code, message, .. } => {
                ApiError::validation(status, *code, vec![message.clone()])
            }
            engine_core::Error::Database { code, message, .. } => ApiError::with_code(status, *code, message),
            engine_core::Error::Validation(msg) => ApiError::bad_request(msg),
            engine_core::Error::Serialization(e) => ApiError::bad_request(e.to_string()),
            _ => match err.error_code() {
                Some(code) => ApiError::with_code(status, code, err.to_string()),
                None => ApiError::internal(err.to_string()),
            },
        }
    }
}
