//! Enqueue gateway, metrics and dead-letter endpoints.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use crawlq_jobs::{DeadLetterRecord, EnqueueReceipt, EnqueueRequest, MetricsSnapshot};
use serde::Deserialize;
use tracing::debug;
use utoipa::IntoParams;

use crate::responses::{ApiResult, AppError};
use crate::state::AppState;

/// Content type of the Prometheus text exposition.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Create the queue router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/enqueue", post(enqueue))
        .route("/metrics", get(metrics))
        .route("/dead-letters", get(dead_letters))
}

/// Query parameters for `GET /metrics`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MetricsParams {
    /// `json` forces the JSON snapshot even when Prometheus is enabled.
    pub format: Option<String>,
}

/// Query parameters for `GET /dead-letters`.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeadLetterParams {
    /// Maximum number of records, newest first.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Accepts a job into the live adapter.
#[utoipa::path(
    post,
    path = "/enqueue",
    tag = "queue",
    request_body = EnqueueRequest,
    responses(
        (status = 200, description = "Job accepted", body = EnqueueReceipt),
        (status = 400, description = "Missing or malformed payload", body = crawlq_core::ErrorResponse),
        (status = 503, description = "Backend unavailable or shutting down", body = crawlq_core::ErrorResponse)
    )
)]
pub async fn enqueue(
    State(state): State<AppState>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> ApiResult<EnqueueReceipt> {
    let Json(request) = body?;
    let receipt = state.service.enqueue(request).await?;
    debug!(job_id = %receipt.job_id, using_fallback = receipt.using_fallback, "Enqueue accepted");
    Ok(Json(receipt))
}

/// Current counters, as Prometheus text when the exporter is installed.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "queue",
    params(MetricsParams),
    responses(
        (status = 200, description = "Metrics snapshot", content(
            (MetricsSnapshot = "application/json"),
            (String = "text/plain")
        ))
    )
)]
pub async fn metrics(
    State(state): State<AppState>,
    params: Result<Query<MetricsParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params?;
    // Refreshes the sampled gauges before rendering either form.
    let snapshot = state.service.metrics_snapshot().await;

    let wants_json = params
        .format
        .as_deref()
        .is_some_and(|format| format.eq_ignore_ascii_case("json"));

    let response = match &state.prometheus {
        Some(handle) if !wants_json => {
            ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render()).into_response()
        }
        _ => Json(snapshot).into_response(),
    };
    Ok(response)
}

/// Newest dead-letter records of the live adapter.
#[utoipa::path(
    get,
    path = "/dead-letters",
    tag = "queue",
    params(DeadLetterParams),
    responses(
        (status = 200, description = "Dead-letter records, newest first", body = [DeadLetterRecord]),
        (status = 503, description = "Backend unavailable", body = crawlq_core::ErrorResponse)
    )
)]
pub async fn dead_letters(
    State(state): State<AppState>,
    params: Result<Query<DeadLetterParams>, QueryRejection>,
) -> ApiResult<Vec<DeadLetterRecord>> {
    let Query(params) = params?;
    Ok(Json(state.service.dead_letters(params.limit).await?))
}
