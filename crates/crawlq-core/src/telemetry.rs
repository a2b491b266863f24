//! Logging and tracing bootstrap.
//!
//! Always installs a `tracing-subscriber` registry with an `EnvFilter` and a
//! console formatter (pretty or JSON). With the `telemetry` feature and an
//! OTLP endpoint configured, spans are also exported through OpenTelemetry.

#[cfg(feature = "telemetry")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "telemetry")]
use opentelemetry::KeyValue;
#[cfg(feature = "telemetry")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "telemetry")]
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler},
    Resource,
};
#[cfg(feature = "telemetry")]
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::CrawlqResult;

const DEFAULT_FILTER: &str = "info,crawlq=debug,tower_http=debug";

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to exported spans.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Base log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Console format: `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// OTLP endpoint URL (e.g., "http://localhost:4317").
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Sampling ratio (0.0 to 1.0).
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_service_name() -> String {
    "crawlq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            otlp_endpoint: None,
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

impl TelemetryConfig {
    /// Returns true if the JSON console formatter is selected.
    pub fn is_json(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if self.log_level.eq_ignore_ascii_case("info") {
                EnvFilter::new(DEFAULT_FILTER)
            } else {
                EnvFilter::new(format!("{},tower_http=info", self.log_level))
            }
        })
    }
}

/// Initialize logging (and span export when enabled) for the process.
#[cfg(feature = "telemetry")]
pub fn init_telemetry(config: &TelemetryConfig) -> CrawlqResult<()> {
    let Some(endpoint) = &config.otlp_endpoint else {
        return init_console(config);
    };

    let sampler = if config.sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sampling_ratio)
    };

    let resource = Resource::new(vec![KeyValue::new(SERVICE_NAME, config.service_name.clone())]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| crate::CrawlqError::Internal(format!("Failed to create OTLP exporter: {}", e)))?;

    let tracer_provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer("crawlq");
    opentelemetry::global::set_tracer_provider(tracer_provider);

    let json = config.is_json();
    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_target(true)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()
        .map_err(|e| crate::CrawlqError::Internal(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        sampling_ratio = %config.sampling_ratio,
        otlp_endpoint = %endpoint,
        "Telemetry initialized"
    );

    Ok(())
}

/// Initialize console logging.
#[cfg(not(feature = "telemetry"))]
pub fn init_telemetry(config: &TelemetryConfig) -> CrawlqResult<()> {
    init_console(config)
}

fn init_console(config: &TelemetryConfig) -> CrawlqResult<()> {
    let json = config.is_json();
    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_target(true)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)))
        .try_init()
        .map_err(|e| crate::CrawlqError::Internal(format!("Failed to install subscriber: {}", e)))
}

/// Shutdown telemetry, flushing any pending spans.
#[cfg(feature = "telemetry")]
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
    tracing::info!("Telemetry shutdown complete");
}

/// No-op when span export is compiled out.
#[cfg(not(feature = "telemetry"))]
pub fn shutdown_telemetry() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "crawlq");
        assert_eq!(config.sampling_ratio, 1.0);
        assert!(config.otlp_endpoint.is_none());
        assert!(!config.is_json());
    }

    #[test]
    fn test_json_format_detection() {
        let config = TelemetryConfig {
            log_format: "JSON".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(config.is_json());
    }

    #[test]
    fn test_second_init_reports_error_instead_of_panicking() {
        let config = TelemetryConfig::default();
        let _ = init_telemetry(&config);
        assert!(init_telemetry(&config).is_err());
    }
}
