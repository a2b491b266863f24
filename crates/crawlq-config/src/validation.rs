//! Configuration validation.
//!
//! Every check runs and all problems are reported together, so a bad
//! deployment fails once with the full list instead of one error per restart.

use crate::AppConfig;
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// Port number is invalid (must be 1-65535).
    InvalidPort { name: String, value: u16 },
    /// A value that must be at least one was zero.
    MustBePositive { name: String },
    /// Retry base delay exceeds the configured ceiling.
    BackoffOutOfRange { base_ms: u64, max_ms: u64 },
    /// Sampling ratio must be between 0.0 and 1.0.
    InvalidSamplingRatio { value: f64 },
    /// Log level is invalid.
    InvalidLogLevel { value: String },
    /// Log format is invalid.
    InvalidLogFormat { value: String },
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Required string was empty.
    Empty { name: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPort { name, value } => {
                write!(f, "Invalid port for {}: {} (must be 1-65535)", name, value)
            }
            Self::MustBePositive { name } => write!(f, "'{}' must be at least 1", name),
            Self::BackoffOutOfRange { base_ms, max_ms } => write!(
                f,
                "retry.base_delay_ms ({}) cannot exceed retry.max_delay_ms ({})",
                base_ms, max_ms
            ),
            Self::InvalidSamplingRatio { value } => write!(
                f,
                "Invalid sampling ratio: {} (must be between 0.0 and 1.0)",
                value
            ),
            Self::InvalidLogLevel { value } => write!(
                f,
                "Invalid log level: '{}' (valid: trace, debug, info, warn, error)",
                value
            ),
            Self::InvalidLogFormat { value } => {
                write!(f, "Invalid log format: '{}' (valid: pretty, json)", value)
            }
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::Empty { name } => write!(f, "'{}' cannot be empty", name),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    const VALID_LOG_LEVELS: &'static [&'static str] = &["trace", "debug", "info", "warn", "error"];
    const VALID_LOG_FORMATS: &'static [&'static str] = &["pretty", "json"];

    /// Validates the entire application configuration.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_server(config, &mut errors);
        Self::validate_redis(config, &mut errors);
        Self::validate_worker(config, &mut errors);
        Self::validate_retry(config, &mut errors);
        Self::validate_probe(config, &mut errors);
        Self::validate_observability(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.server.port == 0 {
            errors.push(ConfigValidationError::InvalidPort {
                name: "server.port".to_string(),
                value: 0,
            });
        }
        if config.server.request_timeout_secs == 0 {
            errors.push(positive("server.request_timeout_secs"));
        }
    }

    fn validate_redis(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let redis = &config.redis;
        if redis.port == 0 {
            errors.push(ConfigValidationError::InvalidPort {
                name: "redis.port".to_string(),
                value: 0,
            });
        }
        if redis.host.trim().is_empty() {
            errors.push(ConfigValidationError::Empty {
                name: "redis.host".to_string(),
            });
        }
        if redis.queue_name.trim().is_empty() {
            errors.push(ConfigValidationError::Empty {
                name: "redis.queue_name".to_string(),
            });
        }
        if redis.pool_size == 0 {
            errors.push(positive("redis.pool_size"));
        }
        if redis.connect_timeout_ms == 0 {
            errors.push(positive("redis.connect_timeout_ms"));
        }
    }

    fn validate_worker(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let worker = &config.worker;
        if worker.concurrency == 0 {
            errors.push(positive("worker.concurrency"));
        }
        if worker.job_timeout_secs == 0 {
            errors.push(positive("worker.job_timeout_secs"));
        }
        if worker.poll_interval_ms == 0 {
            errors.push(positive("worker.poll_interval_ms"));
        }
    }

    fn validate_retry(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let retry = &config.retry;
        if retry.max_attempts == 0 {
            errors.push(positive("retry.max_attempts"));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            errors.push(ConfigValidationError::BackoffOutOfRange {
                base_ms: retry.base_delay_ms,
                max_ms: retry.max_delay_ms,
            });
        }
    }

    fn validate_probe(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.probe.interval_ms == 0 {
            errors.push(positive("probe.interval_ms"));
        }
        if config.probe.timeout_ms == 0 {
            errors.push(positive("probe.timeout_ms"));
        }
    }

    fn validate_observability(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let obs = &config.observability;

        let level = obs.log_level.to_lowercase();
        if !Self::VALID_LOG_LEVELS.contains(&level.as_str()) {
            errors.push(ConfigValidationError::InvalidLogLevel {
                value: obs.log_level.clone(),
            });
        }

        let format = obs.log_format.to_lowercase();
        if !Self::VALID_LOG_FORMATS.contains(&format.as_str()) {
            errors.push(ConfigValidationError::InvalidLogFormat {
                value: obs.log_format.clone(),
            });
        }

        if !(0.0..=1.0).contains(&obs.sampling_ratio) {
            errors.push(ConfigValidationError::InvalidSamplingRatio {
                value: obs.sampling_ratio,
            });
        }

        if let Some(ref endpoint) = obs.otlp_endpoint {
            if Url::parse(endpoint).is_err() {
                errors.push(ConfigValidationError::InvalidUrl {
                    url_type: "otlp_endpoint".to_string(),
                    message: format!("Invalid URL format: {}", endpoint),
                });
            }
        }
    }
}

fn positive(name: &str) -> ConfigValidationError {
    ConfigValidationError::MustBePositive {
        name: name.to_string(),
    }
}
