//! Job record and identifiers.

use crate::error::JobError;
use crate::retry::BackoffPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Waiting in a queue, possibly delayed.
    Queued,
    /// Handed to a worker.
    Active,
    /// Finished successfully.
    Completed,
    /// Last attempt failed; may be retried.
    Failed,
    /// Out of attempts, recorded in the dead-letter sink.
    DeadLettered,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::DeadLettered => "dead-lettered",
        };
        f.write_str(s)
    }
}

/// A unit of work with an opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job ID.
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub id: JobId,

    /// Opaque payload handed to the processor.
    pub payload: serde_json::Value,

    /// Optional priority; higher runs first on the durable backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Delivery attempts started so far.
    #[serde(default)]
    pub attempts: u32,

    /// Attempts allowed before dead-lettering.
    pub max_attempts: u32,

    /// Retry schedule.
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub backoff: BackoffPolicy,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Start of the latest attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    /// Creates a queued job with no attempts.
    pub fn new(payload: serde_json::Value, max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            id: JobId::new(),
            payload,
            priority: None,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            backoff,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Option<i32>) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the start of a delivery attempt.
    pub fn begin_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.status = JobStatus::Active;
        self.started_at = Some(Utc::now());
    }

    /// Marks the job as completed.
    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Records a failed attempt.
    pub fn mark_failed(&mut self, error: &JobError) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error.to_string());
    }

    /// Puts a failed job back in the queued state for its next attempt.
    pub fn requeue(&mut self) {
        self.status = JobStatus::Queued;
        self.started_at = None;
    }

    /// Marks the job as dead-lettered.
    pub fn mark_dead_lettered(&mut self) {
        self.status = JobStatus::DeadLettered;
        self.completed_at = Some(Utc::now());
    }

    /// Returns true once every allowed attempt has been used.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delay before the next attempt, based on attempts used so far.
    pub fn retry_delay(&self) -> Duration {
        self.backoff.delay_for(self.attempts)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::new(json!({"url": "https://example.com"}), 3, BackoffPolicy::exponential(100, 1000))
    }

    #[test]
    fn test_job_id_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = job();
        assert_eq!(job.attempts, 0);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(!job.is_exhausted());
    }

    #[test]
    fn test_max_attempts_at_least_one() {
        let job = Job::new(json!({"a": 1}), 0, BackoffPolicy::default());
        assert_eq!(job.max_attempts, 1);
    }

    #[test]
    fn test_attempt_lifecycle() {
        let mut job = job();
        job.begin_attempt();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.status, JobStatus::Active);
        assert!(job.started_at.is_some());

        job.mark_failed(&JobError::ExecutionFailed("boom".into()));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_delay(), Duration::from_millis(100));

        job.requeue();
        job.begin_attempt();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.retry_delay(), Duration::from_millis(200));

        job.begin_attempt();
        assert!(job.is_exhausted());
        job.mark_dead_lettered();
        assert_eq!(job.status, JobStatus::DeadLettered);
        assert!(job.last_error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(job().with_priority(Some(5))).unwrap();
        assert_eq!(json["maxAttempts"], 3);
        assert_eq!(json["priority"], 5);
        assert_eq!(json["status"], "queued");
        assert_eq!(json["backoff"]["type"], "exponential");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("lastError").is_none());
    }

    #[test]
    fn test_json_preserves_payload() {
        let original = job();
        let parsed = Job::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(parsed.id, original.id);
        assert_eq!(parsed.payload, original.payload);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::DeadLettered.to_string(), "dead-lettered");
    }
}
