//! Stateless feature computation.
//!
//! The caller supplies raw events, optional users, and optional checkpoints
//! from a previous call; nothing is read from or written to the warehouse.

use axum::{body::Bytes, extract::State, Json};
use chrono::{DateTime, Utc};
use engine_core::{
    error::ValidationErrorCode,
    limits::{MAX_COMPUTE_BODY_BYTES, MAX_COMPUTE_EVENTS},
    Checkpoint, RawEvent, RawUser,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};
use worker::FeatureBatch;

use crate::response::{ApiError, ComputeResponse};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ComputeRequest {
    pub events: Vec<RawEvent>,
    #[serde(default)]
    pub users: Vec<RawUser>,
    /// Checkpoints returned by an earlier call
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    /// Entities known to have days before this batch
    #[serde(default)]
    pub history_expected: Vec<String>,
    /// Reference clock, defaults to now
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl ComputeRequest {
    fn into_batch(self) -> FeatureBatch {
        let mut batch = FeatureBatch::new(self.events, self.users, self.as_of.unwrap_or_else(Utc::now));
        batch.checkpoints = self
            .checkpoints
            .into_iter()
            .map(|cp| (cp.entity_id.clone(), cp))
            .collect();
        batch.history_expected = self.history_expected.into_iter().collect::<HashSet<_>>();
        batch
    }
}

/// POST /features/compute
pub async fn compute_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ComputeResponse>, ApiError> {
    let start = Instant::now();

    if body.len() > MAX_COMPUTE_BODY_BYTES {
        return Err(too_large(format!(
            "Payload size {}KB exceeds {}KB limit",
            body.len() / 1024,
            MAX_COMPUTE_BODY_BYTES / 1024
        )));
    }

    let request: ComputeRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!(error = %e, "Rejected compute payload");
        ApiError::bad_request(format!("Invalid JSON: {}", e))
    })?;

    if request.events.len() > MAX_COMPUTE_EVENTS {
        return Err(too_large(format!(
            "Request has {} events, exceeds {} limit",
            request.events.len(),
            MAX_COMPUTE_EVENTS
        )));
    }

    let batch = request.into_batch();
    let pipeline = state.pipeline.clone();
    let output = tokio::task::spawn_blocking(move || pipeline.run(batch))
        .await
        .map_err(|e| ApiError::internal(format!("Compute task failed: {}", e)))?;

    info!(
        entities = output.entities.len(),
        rows = output.row_count(),
        failures = output.failures.len(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Compute request processed"
    );

    Ok(Json(ComputeResponse::from(output)))
}

fn too_large(message: String) -> ApiError {
    let code = ValidationErrorCode::BatchTooLarge;
    ApiError::validation(
        axum::http::StatusCode::PAYLOAD_TOO_LARGE,
        code.code(),
        vec![message],
    )
}
