use crate::response::{HealthResponse, WorkerPoolHealth};
use crate::server::AppState;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::{response::IntoResponse, Json};
use log::{error, warn};
use std::sync::Arc;

pub async fn liveness_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.dispatcher.pool().is_running() {
        StatusCode::NO_CONTENT
    } else {
        warn!("Readiness check failed: worker pool is not running");
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pool = state.dispatcher.pool();
    Json(HealthResponse {
        simulation_only: state.dispatcher.adapter().simulation_only(),
        worker_pool: WorkerPoolHealth {
            workers: pool.workers(),
            queue_capacity: pool.capacity(),
            queued: pool.queued(),
            running: pool.running(),
        },
    })
}

pub async fn fallback(uri: Uri) -> (StatusCode, String) {
    error!("Request for unknown URI: {uri}");
    (StatusCode::NOT_FOUND, format!("No route for {uri}"))
}
