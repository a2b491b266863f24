//! Queue service: enqueue gateway, status reads and ordered shutdown.

use crate::adapter::{DeadLetterRecord, QueueMode};
use crate::controller::{DurableConnector, ModeController};
use crate::error::{JobError, JobResult};
use crate::events::{EventBus, QueueEvent, DEFAULT_EVENT_CAPACITY};
use crate::job::{Job, JobId};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::probe::{ConnectivityProbe, TcpProbe};
use crate::redis::RedisConnector;
use crate::retry::BackoffPolicy;
use crate::worker::{JobProcessor, WorkerPool, WorkerPoolConfig};
use crawlq_config::AppConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runtime settings for a [`QueueService`].
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Worker pool settings.
    pub worker: WorkerPoolConfig,
    /// Attempts allowed when the request does not say.
    pub default_max_attempts: u32,
    /// Backoff applied to every new job.
    pub backoff: BackoffPolicy,
    /// Interval between recovery probes while in fallback.
    pub probe_interval: Duration,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for QueueSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            worker: WorkerPoolConfig::from(&config.worker),
            default_max_attempts: config.retry.max_attempts.max(1),
            backoff: BackoffPolicy::from(&config.retry),
            probe_interval: config.probe.interval(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Body of an enqueue call.
///
/// Fields are loosely typed so that every malformed request surfaces as a
/// [`JobError::Validation`] with a readable message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EnqueueRequest {
    /// Opaque job payload. Required; must be a non-empty JSON object.
    #[serde(default)]
    pub payload: Option<Value>,
    /// Optional integer priority.
    #[serde(default)]
    pub priority: Option<Value>,
    /// Optional per-job attempt limit, at least 1.
    #[serde(default)]
    pub max_attempts: Option<Value>,
}

impl EnqueueRequest {
    /// Request with just a payload.
    pub fn with_payload(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }

    /// Sets the attempt limit.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(Value::from(max_attempts));
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(Value::from(priority));
        self
    }

    /// Validates the request and builds a fresh job.
    pub fn into_job(self, settings: &QueueSettings) -> JobResult<Job> {
        let payload = match self.payload {
            None | Some(Value::Null) => {
                return Err(JobError::Validation("payload is required".to_string()))
            }
            Some(Value::Object(map)) if map.is_empty() => {
                return Err(JobError::Validation("payload must not be empty".to_string()))
            }
            Some(payload @ Value::Object(_)) => payload,
            Some(_) => {
                return Err(JobError::Validation(
                    "payload must be a JSON object".to_string(),
                ))
            }
        };

        let priority = match self.priority {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_i64()
                    .and_then(|p| i32::try_from(p).ok())
                    .ok_or_else(|| {
                        JobError::Validation("priority must be a 32-bit integer".to_string())
                    })?,
            ),
        };

        let max_attempts = match self.max_attempts {
            None | Some(Value::Null) => settings.default_max_attempts,
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n >= 1)
                .ok_or_else(|| {
                    JobError::Validation("maxAttempts must be an integer >= 1".to_string())
                })?,
        };

        Ok(Job::new(payload, max_attempts, settings.backoff).with_priority(priority))
    }
}

/// Result of a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EnqueueReceipt {
    /// Identifier assigned to the job.
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub job_id: JobId,
    /// True if the job is held in process memory.
    pub using_fallback: bool,
}

/// Liveness and mode report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthReport {
    /// Always true while the process serves requests.
    pub ok: bool,
    /// Live adapter mode.
    pub mode: QueueMode,
    /// Jobs waiting in the live adapter.
    pub queue_depth: u64,
    /// Result of a fresh connectivity probe.
    pub backend_reachable: bool,
}

/// The assembled job queue.
pub struct QueueService {
    controller: Arc<ModeController>,
    pool: Arc<WorkerPool>,
    metrics: Arc<MetricsRegistry>,
    events: EventBus,
    settings: QueueSettings,
    accepting: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueService {
    /// Wires the queue against the configured Redis server.
    pub async fn connect(config: &AppConfig, processor: Arc<dyn JobProcessor>) -> Arc<Self> {
        let probe = Arc::new(TcpProbe::for_redis(&config.redis, &config.probe));
        let connector = Arc::new(
            RedisConnector::new(config.redis.clone()).with_job_timeout(config.worker.job_timeout()),
        );
        Self::start(QueueSettings::from(config), processor, probe, connector).await
    }

    /// Probes the backend, picks a mode, and starts the workers and the
    /// recovery probe.
    pub async fn start(
        settings: QueueSettings,
        processor: Arc<dyn JobProcessor>,
        probe: Arc<dyn ConnectivityProbe>,
        connector: Arc<dyn DurableConnector>,
    ) -> Arc<Self> {
        let events = EventBus::new(settings.event_capacity);
        let metrics = Arc::new(MetricsRegistry::new());
        let controller =
            Arc::new(ModeController::start(probe, connector, events.clone()).await);

        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&controller),
            processor,
            Arc::clone(&metrics),
            events.clone(),
            settings.worker.clone(),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        let recovery = controller.spawn_recovery(settings.probe_interval, shutdown_tx.subscribe());
        let workers = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                if let Err(e) = pool.run().await {
                    error!(error = %e, "Worker pool exited with error");
                }
            })
        };

        info!(
            mode = %controller.mode(),
            concurrency = settings.worker.concurrency,
            "Queue service started"
        );

        Arc::new(Self {
            controller,
            pool,
            metrics,
            events,
            settings,
            accepting: AtomicBool::new(true),
            shutdown_tx,
            tasks: Mutex::new(vec![workers, recovery]),
        })
    }

    /// Validates and stores a job in the live adapter.
    pub async fn enqueue(&self, request: EnqueueRequest) -> JobResult<EnqueueReceipt> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(JobError::ShuttingDown);
        }

        let job = request.into_job(&self.settings)?;
        let (job_id, mode) = match self.controller.enqueue(job).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, mode = %self.controller.mode(), "Failed to enqueue job");
                return Err(e);
            }
        };

        self.metrics.job_enqueued(mode);
        self.events.publish(QueueEvent::JobEnqueued {
            job_id: job_id.clone(),
            mode,
        });
        debug!(job_id = %job_id, mode = %mode, "Job enqueued");

        Ok(EnqueueReceipt {
            job_id,
            using_fallback: mode == QueueMode::Fallback,
        })
    }

    /// Current counters.
    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let depth = self.queue_depth().await;
        let using_fallback = self.controller.is_fallback();
        self.metrics.publish_gauges(depth, using_fallback);
        self.metrics.snapshot(depth, using_fallback)
    }

    /// Liveness, mode and a fresh reachability probe.
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            ok: true,
            mode: self.controller.mode(),
            queue_depth: self.queue_depth().await,
            backend_reachable: self.controller.probe_backend().await,
        }
    }

    /// Newest dead-letter records.
    pub async fn dead_letters(&self, limit: usize) -> JobResult<Vec<DeadLetterRecord>> {
        self.controller.dead_letters(limit).await
    }

    async fn queue_depth(&self) -> u64 {
        match self.controller.depth().await {
            Ok(depth) => depth,
            Err(e) => {
                warn!(error = %e, "Failed to read queue depth");
                0
            }
        }
    }

    /// Live adapter mode.
    pub fn mode(&self) -> QueueMode {
        self.controller.mode()
    }

    /// Event bus for lifecycle observers.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Metrics registry.
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Mode controller.
    pub fn controller(&self) -> &Arc<ModeController> {
        &self.controller
    }

    /// Returns false once shutdown has begun.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stops the service in order: refuse new jobs, stop the recovery probe
    /// and the dispatch loop, wait (bounded) for in-flight jobs, then close
    /// the adapters. Safe to call more than once.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            debug!("Queue service already shutting down");
            return;
        }
        info!("Shutting down queue service");

        let _ = self.shutdown_tx.send(());
        self.pool.stop();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task panicked during shutdown");
            }
        }

        if let Err(e) = self.controller.close().await {
            warn!(error = %e, "Failed to close queue adapters");
        }

        let snapshot = self.metrics.snapshot(0, self.controller.is_fallback());
        info!(
            processed = snapshot.processed,
            failed = snapshot.failed,
            dead_lettered = snapshot.dead_lettered,
            "Queue service stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> QueueSettings {
        QueueSettings::default()
    }

    fn validation_message(request: EnqueueRequest) -> String {
        match request.into_job(&settings()) {
            Err(JobError::Validation(msg)) => msg,
            other => panic!("Expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_payload_required() {
        assert!(validation_message(EnqueueRequest::default()).contains("required"));
        assert!(
            validation_message(EnqueueRequest::with_payload(Value::Null)).contains("required")
        );
    }

    #[test]
    fn test_payload_must_be_non_empty_object() {
        assert!(validation_message(EnqueueRequest::with_payload(json!("x"))).contains("object"));
        assert!(validation_message(EnqueueRequest::with_payload(json!({}))).contains("empty"));
    }

    #[test]
    fn test_priority_must_be_integer() {
        let request = EnqueueRequest {
            priority: Some(json!(1.5)),
            ..EnqueueRequest::with_payload(json!({"url": "a"}))
        };
        assert!(validation_message(request).contains("priority"));
    }

    #[test]
    fn test_max_attempts_at_least_one() {
        let request = EnqueueRequest {
            max_attempts: Some(json!(0)),
            ..EnqueueRequest::with_payload(json!({"url": "a"}))
        };
        assert!(validation_message(request).contains("maxAttempts"));
    }

    #[test]
    fn test_builds_job_with_defaults() {
        let job = EnqueueRequest::with_payload(json!({"url": "a"}))
            .into_job(&settings())
            .unwrap();
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.priority, None);
    }

    #[test]
    fn test_builds_job_with_overrides() {
        let job = EnqueueRequest::with_payload(json!({"url": "a"}))
            .max_attempts(5)
            .priority(-2)
            .into_job(&settings())
            .unwrap();
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.priority, Some(-2));
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: EnqueueRequest =
            serde_json::from_value(json!({"payload": {"a": 1}, "maxAttempts": 2})).unwrap();
        assert_eq!(request.into_job(&settings()).unwrap().max_attempts, 2);
    }

    #[test]
    fn test_receipt_wire_format() {
        let receipt = EnqueueReceipt {
            job_id: JobId::from("abc"),
            using_fallback: true,
        };
        assert_eq!(
            serde_json::to_value(receipt).unwrap(),
            json!({"jobId": "abc", "usingFallback": true})
        );
    }
}
