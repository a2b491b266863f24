//! Health check controller.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use crawlq_jobs::HealthReport;

use crate::state::AppState;

/// Creates the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/live", get(liveness_check))
}

/// Reports the live mode, queue depth and a fresh backend probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is serving requests", body = HealthReport)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.service.health().await)
}

/// Liveness check endpoint.
#[utoipa::path(
    get,
    path = "/live",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive")
    )
)]
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}
