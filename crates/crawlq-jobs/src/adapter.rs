//! Queue adapter abstraction shared by the durable and in-memory backends.

use crate::error::JobResult;
use crate::job::{Job, JobId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which adapter currently receives new jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum QueueMode {
    /// Redis-backed, survives restarts.
    Durable,
    /// Process memory, lost on restart.
    Fallback,
}

impl QueueMode {
    /// Returns the mode as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueMode::Durable => "durable",
            QueueMode::Fallback => "fallback",
        }
    }
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job that ran out of attempts, kept for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    /// The job as it was after its final attempt.
    pub job: Job,
    /// Final failure message.
    pub reason: String,
    /// When the job was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    /// Creates a record stamped with the current time.
    pub fn new(job: Job, reason: impl Into<String>) -> Self {
        Self {
            job,
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Storage backend for jobs.
///
/// Both implementations hand out each job to exactly one consumer. A job
/// returned by [`dequeue`](QueueAdapter::dequeue) is no longer visible to
/// other consumers until it is retried.
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// The mode this adapter serves.
    fn mode(&self) -> QueueMode;

    /// Stores a job and makes it available to consumers.
    async fn enqueue(&self, job: Job) -> JobResult<JobId>;

    /// Waits up to `wait` for the next ready job.
    async fn dequeue(&self, wait: Duration) -> JobResult<Option<Job>>;

    /// Acknowledges a successfully processed job.
    async fn complete(&self, job: &Job) -> JobResult<()>;

    /// Makes a failed job available again after `delay`.
    async fn retry(&self, job: Job, delay: Duration) -> JobResult<()>;

    /// Persists a record for a job that ran out of attempts.
    async fn dead_letter(&self, record: DeadLetterRecord) -> JobResult<()>;

    /// Jobs waiting to run, including delayed retries.
    async fn depth(&self) -> JobResult<u64>;

    /// Most recent dead-letter records, newest first.
    async fn dead_letters(&self, limit: usize) -> JobResult<Vec<DeadLetterRecord>>;

    /// Releases resources. Consumers waiting in `dequeue` return `None`.
    async fn close(&self) -> JobResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffPolicy;
    use serde_json::json;

    #[test]
    fn test_mode_display() {
        assert_eq!(QueueMode::Durable.to_string(), "durable");
        assert_eq!(
            serde_json::to_value(QueueMode::Fallback).unwrap(),
            json!("fallback")
        );
    }

    #[test]
    fn test_dead_letter_record_format() {
        let job = Job::new(json!({"url": "a"}), 1, BackoffPolicy::default());
        let record = DeadLetterRecord::new(job, "boom");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["reason"], "boom");
        assert_eq!(value["job"]["payload"]["url"], "a");
        assert!(value.get("failedAt").is_some());
    }
}
