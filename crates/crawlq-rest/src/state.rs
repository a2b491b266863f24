//! Application state for Axum handlers.

use crawlq_jobs::QueueService;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QueueService>,
    /// Present when the Prometheus recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Creates a new application state serving JSON metrics only.
    pub fn new(service: Arc<QueueService>) -> Self {
        Self {
            service,
            prometheus: None,
        }
    }

    /// Serves `GET /metrics` in the Prometheus text format.
    #[must_use]
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
