use crate::handlers::{fallback, health_handler, liveness_handler, readiness_handler};
use crate::server::AppState;

use axum::{routing::get, Router};
use std::sync::Arc;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/capmc/v1/liveness", get(liveness_handler))
        .route("/capmc/v1/readiness", get(readiness_handler))
        .route("/capmc/v1/health", get(health_handler))
        .fallback(fallback)
        .with_state(state)
}
