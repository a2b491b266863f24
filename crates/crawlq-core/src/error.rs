//! Unified error type for the HTTP-facing layers.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Application-level error shared by the config, REST and server crates.
///
/// Queue-internal failures are modelled by `crawlq_jobs::JobError` and
/// converted into this type at the crate boundary.
#[derive(Error, Debug)]
pub enum CrawlqError {
    /// Malformed request, rejected before it enters the queue.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The durable backend could not be reached.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The service is draining and refuses new work.
    #[error("Service is shutting down")]
    ShuttingDown,

    /// Timeout error.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CrawlqError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::BackendUnavailable(_) | Self::ShuttingDown | Self::Timeout(_) => 503,
            Self::Configuration(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }
}

/// Serializable error body returned by the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new error response from a `CrawlqError`.
    #[must_use]
    pub fn from_error(error: &CrawlqError) -> Self {
        Self {
            code: error.error_code().to_string(),
            error: error.to_string(),
        }
    }
}

impl From<&CrawlqError> for ErrorResponse {
    fn from(error: &CrawlqError) -> Self {
        Self::from_error(error)
    }
}
