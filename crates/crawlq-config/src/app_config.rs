//! Application configuration structures.

use crawlq_core::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable backend (Redis) configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Default retry policy for new jobs.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Backend connectivity probing.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Logging and metrics configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "crawlq".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the request timeout as a Duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Redis configuration for the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// ACL username.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Logical database index.
    pub db: u32,
    /// Connection pool size.
    pub pool_size: usize,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Prefix for every key the queue writes.
    pub key_prefix: String,
    /// Queue name.
    pub queue_name: String,
    /// Drop job records once they complete instead of keeping them in the completed set.
    pub remove_on_complete: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            db: 0,
            pool_size: 10,
            connect_timeout_ms: 3000,
            key_prefix: "crawlq".to_string(),
            queue_name: "crawl-jobs".to_string(),
            remove_on_complete: true,
        }
    }
}

impl RedisConfig {
    /// Builds the connection URL from the individual fields.
    #[must_use]
    pub fn url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
            (None, Some(pass)) => format!(":{}@", pass),
            (Some(user), None) => format!("{}@", user),
            (None, None) => String::new(),
        };
        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.db)
    }

    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of jobs executed concurrently.
    pub concurrency: usize,
    /// Job execution timeout in seconds.
    pub job_timeout_secs: u64,
    /// How long shutdown waits for in-flight jobs, in seconds.
    pub shutdown_timeout_secs: u64,
    /// How long an idle worker waits on the live adapter before re-checking the mode, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            job_timeout_secs: 300,
            shutdown_timeout_secs: 30,
            poll_interval_ms: 1000,
        }
    }
}

impl WorkerConfig {
    /// Returns job timeout as Duration.
    #[must_use]
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Returns shutdown timeout as Duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Returns poll interval as Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Backoff flavour between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles with every attempt.
    #[default]
    Exponential,
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Exponential => write!(f, "exponential"),
        }
    }
}

/// Default retry policy applied to jobs that don't override it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delivery attempts before a job is dead-lettered.
    pub max_attempts: u32,
    /// Backoff flavour.
    pub backoff: BackoffKind,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

/// Connectivity probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Interval between recovery probes while in fallback mode, in milliseconds.
    pub interval_ms: u64,
    /// Per-probe connect timeout, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            timeout_ms: 1000,
        }
    }
}

impl ProbeConfig {
    /// Returns the probe interval as Duration.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the probe timeout as Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (json, pretty).
    pub log_format: String,
    /// Install the Prometheus exporter and serve the scrape format on `/metrics`.
    pub metrics_enabled: bool,
    /// OTLP endpoint for span export.
    pub otlp_endpoint: Option<String>,
    /// Trace sampling ratio.
    pub sampling_ratio: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            otlp_endpoint: None,
            sampling_ratio: 1.0,
        }
    }
}

impl ObservabilityConfig {
    /// Builds the telemetry settings for `crawlq_core::init_telemetry`.
    #[must_use]
    pub fn telemetry(&self, service_name: &str) -> TelemetryConfig {
        TelemetryConfig {
            service_name: service_name.to_string(),
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
            otlp_endpoint: self.otlp_endpoint.clone(),
            sampling_ratio: self.sampling_ratio,
        }
    }
}
