//! # crawlq server
//!
//! Entry point: loads configuration, initializes logging, builds the queue
//! and serves HTTP until SIGINT/SIGTERM.

use crawlq_config::ConfigLoader;
use crawlq_core::{init_telemetry, shutdown_telemetry};
use crawlq_server::{app::Application, processor::LoggingProcessor, startup::print_banner};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {:#}", e);
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ConfigLoader::from_default_location().load()?;
    init_telemetry(&config.observability.telemetry(&config.app.name))?;

    print_banner();
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    let app = Application::build(config, Arc::new(LoggingProcessor)).await?;
    let result = app.run(shutdown_signal()).await;

    shutdown_telemetry();
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
