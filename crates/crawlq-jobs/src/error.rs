//! Job error types.

use crawlq_core::CrawlqError;
use std::time::Duration;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed enqueue request.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The durable backend refused or could not be reached.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The adapter was closed, usually because the queue switched modes.
    #[error("Queue adapter closed: {0}")]
    AdapterClosed(String),

    /// Job execution failed.
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Job timed out.
    #[error("Job timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// A consumer took the job and never reported back.
    #[error("Job lease expired after {} ms", .0.as_millis())]
    LeaseExpired(Duration),

    /// A dead-letter record could not be persisted.
    #[error("Failed to write dead-letter record for job {job_id}: {reason}")]
    DeadLetterWrite { job_id: String, reason: String },

    /// The queue is draining and refuses new work.
    #[error("Queue is shutting down")]
    ShuttingDown,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JobError> for CrawlqError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Validation(msg) => CrawlqError::Validation(msg),
            JobError::ShuttingDown => CrawlqError::ShuttingDown,
            JobError::Configuration(msg) => CrawlqError::Configuration(msg),
            JobError::Timeout(_) => CrawlqError::Timeout(err.to_string()),
            JobError::BackendUnavailable(_)
            | JobError::AdapterClosed(_)
            | JobError::Redis(_)
            | JobError::Pool(_) => CrawlqError::BackendUnavailable(err.to_string()),
            other => CrawlqError::Internal(other.to_string()),
        }
    }
}
