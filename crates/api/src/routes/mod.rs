//! API routes.

pub mod compute;
pub mod entities;
pub mod health;
pub mod jobs;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/features/compute", post(compute::compute_handler))
        .route("/jobs/incremental", post(jobs::incremental_handler))
        .route("/jobs/backfill", post(jobs::backfill_handler))
        .route("/entities/:entity_id/features", get(entities::features_handler))
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
