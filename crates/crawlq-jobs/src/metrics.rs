//! Queue metrics.
//!
//! [`MetricsRegistry`] keeps plain atomic counters for the JSON view and
//! mirrors every update into the `metrics` facade, so an installed Prometheus
//! recorder exposes the same numbers in scrape format. Averages are derived
//! when a snapshot is taken, never stored.

use crate::adapter::QueueMode;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Metric names exported through the `metrics` facade.
pub mod names {
    /// Total jobs accepted by the gateway.
    pub const JOBS_ENQUEUED_TOTAL: &str = "crawlq_jobs_enqueued_total";
    /// Total jobs completed successfully.
    pub const JOBS_PROCESSED_TOTAL: &str = "crawlq_jobs_processed_total";
    /// Total failed attempts.
    pub const JOBS_FAILED_TOTAL: &str = "crawlq_jobs_failed_total";
    /// Total retries scheduled.
    pub const JOBS_RETRIED_TOTAL: &str = "crawlq_jobs_retried_total";
    /// Total jobs sent to the dead-letter sink.
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "crawlq_jobs_dead_lettered_total";

    /// Jobs currently executing.
    pub const JOBS_ACTIVE: &str = "crawlq_jobs_active";
    /// Jobs waiting in the live adapter.
    pub const QUEUE_DEPTH: &str = "crawlq_queue_depth";
    /// 1 while the in-memory fallback is live.
    pub const QUEUE_USING_FALLBACK: &str = "crawlq_queue_using_fallback";

    /// Successful job execution time in seconds.
    pub const JOB_DURATION_SECONDS: &str = "crawlq_job_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::JOBS_ENQUEUED_TOTAL,
        "Total number of jobs accepted for processing"
    );
    describe_counter!(
        names::JOBS_PROCESSED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of failed job attempts"
    );
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of job retries");
    describe_counter!(
        names::JOBS_DEAD_LETTERED_TOTAL,
        "Total number of jobs sent to the dead-letter sink"
    );

    describe_gauge!(names::JOBS_ACTIVE, "Current number of executing jobs");
    describe_gauge!(names::QUEUE_DEPTH, "Current number of waiting jobs");
    describe_gauge!(
        names::QUEUE_USING_FALLBACK,
        "1 when jobs are held in process memory, 0 when durable"
    );

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Successful job execution duration in seconds"
    );
}

/// Point-in-time view of the queue counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MetricsSnapshot {
    /// Jobs accepted by the gateway.
    pub enqueued: u64,
    /// Jobs completed successfully.
    pub processed: u64,
    /// Failed attempts.
    pub failed: u64,
    /// Jobs executing right now.
    pub active: i64,
    /// Jobs waiting in the live adapter.
    pub queue_depth: u64,
    /// Mean successful execution time.
    pub average_job_duration_ms: f64,
    /// Execution time of the most recent successful job.
    pub last_job_duration_ms: u64,
    /// True while the in-memory fallback is live.
    pub using_fallback: bool,
    /// Retries scheduled.
    pub retried: u64,
    /// Jobs sent to the dead-letter sink.
    pub dead_lettered: u64,
}

/// Process-wide counters for job outcomes.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    enqueued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    active: AtomicI64,
    total_duration_ms: AtomicU64,
    last_job_duration_ms: AtomicU64,
}

impl MetricsRegistry {
    /// Creates a registry with every counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted job.
    pub fn job_enqueued(&self, mode: QueueMode) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        counter!(names::JOBS_ENQUEUED_TOTAL, "mode" => mode.as_str()).increment(1);
    }

    /// Record the start of an attempt.
    pub fn job_started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        gauge!(names::JOBS_ACTIVE).increment(1.0);
    }

    /// Record a successful attempt.
    pub fn job_completed(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.total_duration_ms.fetch_add(ms, Ordering::Relaxed);
        self.last_job_duration_ms.store(ms, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.finish_attempt();

        counter!(names::JOBS_PROCESSED_TOTAL).increment(1);
        histogram!(names::JOB_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Record a failed attempt, including timeouts.
    pub fn job_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.finish_attempt();
        counter!(names::JOBS_FAILED_TOTAL).increment(1);
    }

    /// Record a scheduled retry.
    pub fn job_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
        counter!(names::JOBS_RETRIED_TOTAL).increment(1);
    }

    /// Record a dead-lettered job.
    pub fn job_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        counter!(names::JOBS_DEAD_LETTERED_TOTAL).increment(1);
    }

    fn finish_attempt(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        gauge!(names::JOBS_ACTIVE).decrement(1.0);
    }

    /// Jobs currently executing.
    pub fn active(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Refreshes the gauges that are sampled rather than counted.
    pub fn publish_gauges(&self, queue_depth: u64, using_fallback: bool) {
        gauge!(names::QUEUE_DEPTH).set(queue_depth as f64);
        gauge!(names::QUEUE_USING_FALLBACK).set(if using_fallback { 1.0 } else { 0.0 });
    }

    /// Reads every counter. Reading has no side effects.
    pub fn snapshot(&self, queue_depth: u64, using_fallback: bool) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let total_ms = self.total_duration_ms.load(Ordering::Relaxed);
        let average_job_duration_ms = if processed == 0 {
            0.0
        } else {
            total_ms as f64 / processed as f64
        };

        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            processed,
            failed: self.failed.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            queue_depth,
            average_job_duration_ms,
            last_job_duration_ms: self.last_job_duration_ms.load(Ordering::Relaxed),
            using_fallback,
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = MetricsRegistry::new().snapshot(0, true);
        assert_eq!(snapshot.processed, 0);
        assert_eq!(snapshot.average_job_duration_ms, 0.0);
        assert!(snapshot.using_fallback);
    }

    #[test]
    fn test_average_is_derived() {
        let registry = MetricsRegistry::new();
        registry.job_started();
        registry.job_completed(Duration::from_millis(100));
        registry.job_started();
        registry.job_completed(Duration::from_millis(300));

        let snapshot = registry.snapshot(4, false);
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.average_job_duration_ms, 200.0);
        assert_eq!(snapshot.last_job_duration_ms, 300);
        assert_eq!(snapshot.active, 0);
        assert_eq!(snapshot.queue_depth, 4);
    }

    #[test]
    fn test_failures_release_active() {
        let registry = MetricsRegistry::new();
        registry.job_started();
        registry.job_started();
        assert_eq!(registry.active(), 2);

        registry.job_failed();
        registry.job_retried();
        assert_eq!(registry.active(), 1);

        let snapshot = registry.snapshot(0, false);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.retried, 1);
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let registry = MetricsRegistry::new();
        registry.job_enqueued(QueueMode::Fallback);
        registry.job_started();
        registry.job_completed(Duration::from_millis(5));

        assert_eq!(registry.snapshot(0, true), registry.snapshot(0, true));
    }

    #[test]
    fn test_snapshot_json_keys() {
        let json = serde_json::to_value(MetricsRegistry::new().snapshot(0, false)).unwrap();
        for key in [
            "enqueued",
            "processed",
            "failed",
            "active",
            "queueDepth",
            "averageJobDurationMs",
            "usingFallback",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
