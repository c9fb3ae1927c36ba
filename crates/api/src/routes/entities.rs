//! Feature lookup.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::response::{ApiError, EntityFeaturesResponse};
use crate::state::AppState;

const DEFAULT_LIMIT: u32 = 30;
const MAX_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
pub struct FeaturesQuery {
    pub limit: Option<u32>,
}

/// GET /entities/:entity_id/features - newest rows first.
pub async fn features_handler(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Query(query): Query<FeaturesQuery>,
) -> Result<Json<EntityFeaturesResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let rows = state.warehouse.fetch_features(&entity_id, limit).await?;
    Ok(Json(EntityFeaturesResponse { entity_id, rows }))
}
