//! Application assembly and lifecycle.

use anyhow::Context;
use axum::Router;
use crawlq_config::AppConfig;
use crawlq_jobs::{register_metrics, spawn_event_logger, JobProcessor, QueueService};
use crawlq_rest::{create_router, AppState};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::startup::print_startup_info;

/// A fully wired server, ready to bind.
pub struct Application {
    config: AppConfig,
    service: Arc<QueueService>,
    router: Router,
    event_logger: JoinHandle<()>,
}

impl Application {
    /// Builds the queue service and router from configuration.
    ///
    /// Never fails because Redis is down; the queue starts in fallback mode
    /// instead.
    pub async fn build(config: AppConfig, processor: Arc<dyn JobProcessor>) -> anyhow::Result<Self> {
        let prometheus = if config.observability.metrics_enabled {
            Some(install_prometheus()?)
        } else {
            None
        };

        let service = QueueService::connect(&config, processor).await;
        let event_logger = spawn_event_logger(service.events());

        let mut state = AppState::new(Arc::clone(&service));
        if let Some(handle) = prometheus {
            state = state.with_prometheus(handle);
        }
        let router = create_router(state, &config.server);

        Ok(Self {
            config,
            service,
            router,
            event_logger,
        })
    }

    /// The assembled queue service.
    pub fn service(&self) -> &Arc<QueueService> {
        &self.service
    }

    /// Serves HTTP until `signal` resolves, then shuts down in order:
    /// refuse enqueues, drain in-flight jobs, close adapters, stop serving.
    pub async fn run<F>(self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.server.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        info!("Starting REST server on http://{}", addr);
        print_startup_info(&self.config, self.service.mode());

        let service = Arc::clone(&self.service);
        let shutdown = async move {
            signal.await;
            service.shutdown().await;
        };

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("REST server error")?;

        self.event_logger.abort();
        info!("Server stopped");
        Ok(())
    }
}

/// Installs the global Prometheus recorder and describes the queue metrics.
fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    register_metrics();
    info!("Prometheus recorder installed");
    Ok(handle)
}
