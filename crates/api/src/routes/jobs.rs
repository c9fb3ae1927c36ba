//! Job triggers.

use axum::{extract::State, Json};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use worker::JobSummary;

use crate::response::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IncrementalRequest {
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackfillRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

/// POST /jobs/incremental
pub async fn incremental_handler(
    State(state): State<AppState>,
    request: Option<Json<IncrementalRequest>>,
) -> Result<Json<JobSummary>, ApiError> {
    let as_of = request.and_then(|Json(r)| r.as_of).unwrap_or_else(Utc::now);
    let summary = state.job.run_incremental(as_of).await?;
    Ok(Json(summary))
}

/// POST /jobs/backfill
pub async fn backfill_handler(
    State(state): State<AppState>,
    Json(request): Json<BackfillRequest>,
) -> Result<Json<JobSummary>, ApiError> {
    let as_of = request.as_of.unwrap_or_else(Utc::now);
    let summary = state.backfill.run(request.start, request.end, as_of).await?;
    Ok(Json(summary))
}
