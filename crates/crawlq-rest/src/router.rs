//! Main application router.

use crate::{
    controllers::{health_controller, queue_controller},
    middleware::logging_middleware,
    openapi::ApiDoc,
    state::AppState,
};
use axum::{middleware, routing::get, Router};
use crawlq_config::ServerConfig;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Creates the main application router.
pub fn create_router(state: AppState, server_config: &ServerConfig) -> Router {
    let router = Router::new()
        .merge(queue_controller::router())
        .merge(health_controller::router())
        .route("/", get(root))
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(server_config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(logging_middleware));

    info!("Router created with queue endpoints and Swagger UI at /swagger-ui");
    router
}

/// Root endpoint handler.
async fn root() -> &'static str {
    concat!("crawlq ", env!("CARGO_PKG_VERSION"))
}
