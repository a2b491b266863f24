//! Worker pool for processing jobs.

use crate::adapter::{DeadLetterRecord, QueueAdapter};
use crate::controller::ModeController;
use crate::error::{JobError, JobResult};
use crate::events::{EventBus, QueueEvent};
use crate::job::Job;
use crate::metrics::MetricsRegistry;
use async_trait::async_trait;
use crawlq_config::WorkerConfig;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum jobs executing at once.
    pub concurrency: usize,

    /// Job execution timeout.
    pub job_timeout: Duration,

    /// How long an idle worker waits on the live adapter.
    pub poll_interval: Duration,

    /// Shutdown timeout.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for WorkerPoolConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            job_timeout: config.job_timeout(),
            poll_interval: config.poll_interval(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// Executes job payloads.
///
/// Any `Err` counts as a failed attempt and is retried with backoff until the
/// job's `max_attempts` are used up, then dead-lettered.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Process one attempt of `job`.
    async fn process(&self, job: &Job) -> Result<serde_json::Value, JobError>;
}

/// Job handler function type.
pub type ProcessorFn =
    Box<dyn Fn(Job) -> BoxFuture<'static, Result<serde_json::Value, JobError>> + Send + Sync>;

/// [`JobProcessor`] built from an async closure.
pub struct FnProcessor {
    handler: ProcessorFn,
}

impl FnProcessor {
    /// Wraps `f`, which receives an owned copy of each job.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, JobError>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |job| Box::pin(f(job))),
        }
    }
}

#[async_trait]
impl JobProcessor for FnProcessor {
    async fn process(&self, job: &Job) -> Result<serde_json::Value, JobError> {
        (self.handler)(job.clone()).await
    }
}

/// State shared between the dispatch loop and job tasks.
struct Shared {
    controller: Arc<ModeController>,
    processor: Arc<dyn JobProcessor>,
    metrics: Arc<MetricsRegistry>,
    events: EventBus,
    job_timeout: Duration,
}

/// Worker pool for concurrent job processing.
///
/// Pulls from whichever adapter is live at the time of each poll, so a mode
/// switch is picked up on the next iteration without restarting the pool.
pub struct WorkerPool {
    id: String,
    shared: Arc<Shared>,
    config: WorkerPoolConfig,
    semaphore: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    stopping: AtomicBool,
    running: AtomicBool,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(
        controller: Arc<ModeController>,
        processor: Arc<dyn JobProcessor>,
        metrics: Arc<MetricsRegistry>,
        events: EventBus,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let concurrency = config.concurrency.max(1);

        Self {
            id: format!("worker-pool-{}", Uuid::new_v4()),
            shared: Arc::new(Shared {
                controller,
                processor,
                metrics,
                events,
                job_timeout: config.job_timeout,
            }),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            config: WorkerPoolConfig {
                concurrency,
                ..config
            },
            shutdown_tx,
            stopping: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Run the dispatch loop until [`stop`](Self::stop) is called, then wait
    /// up to the shutdown timeout for in-flight jobs.
    pub async fn run(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Internal("Worker pool already running".to_string()));
        }

        info!(
            pool_id = %self.id,
            concurrency = self.config.concurrency,
            "Starting worker pool"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        while !self.is_stopping() {
            let permit = tokio::select! {
                _ = shutdown_rx.recv() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Not raced against shutdown: a dequeue cancelled mid-flight
            // could lose a job the adapter already handed out.
            let adapter = self.shared.controller.current().await;
            match adapter.dequeue(self.config.poll_interval).await {
                Ok(Some(job)) => {
                    let shared = Arc::clone(&self.shared);
                    let span = tracing::info_span!("job", job_id = %job.id);
                    tokio::spawn(
                        async move {
                            execute(&shared, adapter, job).await;
                            drop(permit);
                        }
                        .instrument(span),
                    );
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    error!(pool_id = %self.id, error = %e, "Failed to dequeue job");
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        info!(
            pool_id = %self.id,
            active = self.shared.metrics.active(),
            "Waiting for in-flight jobs to finish"
        );
        let all = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        match timeout(self.config.shutdown_timeout, self.semaphore.acquire_many(all)).await {
            Ok(_) => info!(pool_id = %self.id, "Worker pool stopped"),
            Err(_) => warn!(
                pool_id = %self.id,
                still_active = self.shared.metrics.active(),
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Shutdown timeout elapsed with jobs still running"
            ),
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Stop taking new jobs. In-flight jobs keep running.
    pub fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!(pool_id = %self.id, "Stopping worker pool");
        }
        let _ = self.shutdown_tx.send(());
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// One delivery attempt, from processor call through acknowledgement.
async fn execute(shared: &Shared, source: Arc<dyn QueueAdapter>, mut job: Job) {
    job.begin_attempt();
    shared.metrics.job_started();
    debug!(job_id = %job.id, attempt = job.attempts, "Processing job");

    let started = Instant::now();
    let outcome = match timeout(shared.job_timeout, shared.processor.process(&job)).await {
        Ok(result) => result,
        Err(_) => Err(JobError::Timeout(shared.job_timeout)),
    };
    let elapsed = started.elapsed();

    match outcome {
        Ok(_) => {
            job.mark_completed();
            if let Err(e) = source.complete(&job).await {
                error!(job_id = %job.id, error = %e, "Failed to acknowledge completed job");
            }
            shared.metrics.job_completed(elapsed);
            shared.events.publish(QueueEvent::JobCompleted {
                job_id: job.id.clone(),
                attempts: job.attempts,
                duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            });
            debug!(job_id = %job.id, duration_ms = elapsed.as_millis() as u64, "Job completed");
        }
        Err(err) => {
            job.mark_failed(&err);
            shared.metrics.job_failed();
            let will_retry = !job.is_exhausted();

            warn!(
                job_id = %job.id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                will_retry,
                error = %err,
                "Job attempt failed"
            );
            shared.events.publish(QueueEvent::JobFailed {
                job_id: job.id.clone(),
                attempt: job.attempts,
                error: err.to_string(),
                will_retry,
            });

            if will_retry {
                schedule_retry(shared, job).await;
            } else {
                dead_letter(shared, job, &err).await;
            }
        }
    }
}

async fn schedule_retry(shared: &Shared, mut job: Job) {
    let delay = job.retry_delay();
    let job_id = job.id.clone();
    job.requeue();

    match shared.controller.retry(job, delay).await {
        Ok(()) => {
            shared.metrics.job_retried();
            debug!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "Retry scheduled");
        }
        Err(e) => error!(job_id = %job_id, error = %e, "Failed to schedule retry"),
    }
}

async fn dead_letter(shared: &Shared, mut job: Job, err: &JobError) {
    job.mark_dead_lettered();
    let job_id = job.id.clone();
    let attempts = job.attempts;
    let record = DeadLetterRecord::new(job, err.to_string());
    let payload = record.job.payload.clone();

    match shared.controller.dead_letter(record).await {
        Ok(()) => {
            shared.metrics.job_dead_lettered();
            shared.events.publish(QueueEvent::JobDeadLettered {
                job_id: job_id.clone(),
                attempts,
                reason: err.to_string(),
            });
            warn!(job_id = %job_id, attempts, reason = %err, "Job moved to dead-letter sink");
        }
        Err(e) => {
            // The only remaining copy of the job is this log line.
            error!(
                job_id = %job_id,
                attempts,
                reason = %err,
                payload = %payload,
                error = %e,
                "Failed to write dead-letter record; job is lost"
            );
        }
    }
}
