//! Default job processor for the standalone binary.

use async_trait::async_trait;
use crawlq_jobs::{Job, JobError, JobProcessor};
use serde_json::{json, Value};
use tracing::info;

/// Acknowledges every job after logging it.
///
/// Embedders supply their own [`JobProcessor`]; this one keeps the binary
/// useful for smoke tests and for draining a queue by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProcessor;

#[async_trait]
impl JobProcessor for LoggingProcessor {
    async fn process(&self, job: &Job) -> Result<Value, JobError> {
        info!(
            job_id = %job.id,
            attempt = job.attempts,
            payload = %job.payload,
            "Processing job"
        );
        Ok(json!({ "acknowledged": true }))
    }
}
