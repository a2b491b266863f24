//! Server startup utilities.

use crawlq_config::AppConfig;
use crawlq_jobs::QueueMode;
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
                        __
  ______________ __  __/ /___ _
 / ___/ ___/ __ `/ | /| / / __ `/
/ /__/ /  / /_/ /| |/ |/ / /_/ /
\___/_/   \__,_/ |__/|__/\__, /
                           /_/
    "#);
}

/// Prints server startup information.
pub fn print_startup_info(config: &AppConfig, mode: QueueMode) {
    let separator = "=".repeat(60);
    let addr = config.server.addr();
    info!("{}", separator);
    info!("Queue mode: {}", mode);
    info!("Backend:    {}:{}", config.redis.host, config.redis.port);
    info!("Enqueue:    POST http://{}/enqueue", addr);
    info!("Metrics:    http://{}/metrics", addr);
    info!("Health:     http://{}/health", addr);
    info!("API Docs:   http://{}/swagger-ui", addr);
    info!("{}", separator);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_banner_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        print_banner();
    }

    #[test]
    fn test_print_startup_info_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        print_startup_info(&AppConfig::default(), QueueMode::Fallback);
    }
}
