//! Shared fixtures for the queue integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use crawlq_jobs::{
    BackoffPolicy, ConnectivityProbe, DeadLetterRecord, DurableConnector, FnProcessor, Job,
    JobError, JobId, JobProcessor, JobResult, MemoryQueue, QueueAdapter, QueueMode, QueueService,
    QueueSettings, WorkerPoolConfig,
};
use serde_json::{json, Value};
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Probe whose answer the test controls.
#[derive(Default)]
pub struct ScriptedProbe {
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for ScriptedProbe {
    async fn is_reachable(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }

    fn target(&self) -> String {
        "scripted:6379".to_string()
    }
}

/// Durable stand-in: a memory queue that reports durable mode and can be
/// told to refuse writes.
#[derive(Default)]
pub struct ScriptedDurable {
    inner: MemoryQueue,
    refuse_enqueue: AtomicBool,
    refuse_dead_letter: AtomicBool,
    enqueue_attempts: AtomicUsize,
    retry_attempts: AtomicUsize,
    closed: AtomicBool,
}

impl ScriptedDurable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse_enqueue(&self, refuse: bool) {
        self.refuse_enqueue.store(refuse, Ordering::SeqCst);
    }

    pub fn refuse_dead_letter(&self, refuse: bool) {
        self.refuse_dead_letter.store(refuse, Ordering::SeqCst);
    }

    pub fn enqueue_attempts(&self) -> usize {
        self.enqueue_attempts.load(Ordering::SeqCst)
    }

    pub fn retry_attempts(&self) -> usize {
        self.retry_attempts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every connect hands out a fresh client, like a new Redis pool would.
    fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.inner.reopen();
    }
}

#[async_trait]
impl QueueAdapter for ScriptedDurable {
    fn mode(&self) -> QueueMode {
        QueueMode::Durable
    }

    async fn enqueue(&self, job: Job) -> JobResult<JobId> {
        self.enqueue_attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse_enqueue.load(Ordering::SeqCst) {
            return Err(JobError::BackendUnavailable("connection refused".to_string()));
        }
        self.inner.enqueue(job).await
    }

    async fn dequeue(&self, wait: Duration) -> JobResult<Option<Job>> {
        self.inner.dequeue(wait).await
    }

    async fn complete(&self, job: &Job) -> JobResult<()> {
        self.inner.complete(job).await
    }

    async fn retry(&self, job: Job, delay: Duration) -> JobResult<()> {
        self.retry_attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse_enqueue.load(Ordering::SeqCst) {
            return Err(JobError::BackendUnavailable("connection refused".to_string()));
        }
        self.inner.retry(job, delay).await
    }

    async fn dead_letter(&self, record: DeadLetterRecord) -> JobResult<()> {
        if self.refuse_dead_letter.load(Ordering::SeqCst) {
            return Err(JobError::DeadLetterWrite {
                job_id: record.job.id.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        self.inner.dead_letter(record).await
    }

    async fn depth(&self) -> JobResult<u64> {
        self.inner.depth().await
    }

    async fn dead_letters(&self, limit: usize) -> JobResult<Vec<DeadLetterRecord>> {
        self.inner.dead_letters(limit).await
    }

    async fn close(&self) -> JobResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close().await
    }
}

/// Connector handing out one shared [`ScriptedDurable`].
pub struct ScriptedConnector {
    pub durable: Arc<ScriptedDurable>,
    fail: AtomicBool,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            durable: ScriptedDurable::new(),
            fail: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        let connector = Self::new();
        connector.fail.store(true, Ordering::SeqCst);
        connector
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableConnector for ScriptedConnector {
    async fn connect(&self) -> JobResult<Arc<dyn QueueAdapter>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(JobError::BackendUnavailable("handshake failed".to_string()));
        }
        self.durable.reopen();
        let adapter: Arc<dyn QueueAdapter> = self.durable.clone();
        Ok(adapter)
    }
}

/// Settings tuned for fast tests.
pub fn fast_settings(concurrency: usize) -> QueueSettings {
    QueueSettings {
        worker: WorkerPoolConfig {
            concurrency,
            job_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(5),
        },
        default_max_attempts: 3,
        backoff: BackoffPolicy::exponential(10, 100),
        probe_interval: Duration::from_millis(50),
        event_capacity: 256,
    }
}

/// Processor that counts calls and succeeds.
pub fn counting_processor(counter: Arc<AtomicUsize>) -> Arc<dyn JobProcessor> {
    Arc::new(FnProcessor::new(move |_job: Job| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }))
}

/// Processor that always fails with a retryable error.
pub fn failing_processor() -> Arc<dyn JobProcessor> {
    Arc::new(FnProcessor::new(|_job: Job| async move {
        Err::<Value, _>(JobError::ExecutionFailed("upstream returned 500".to_string()))
    }))
}

/// Processor that fails the first `failures` attempts of each job.
pub fn flaky_processor(failures: u32) -> Arc<dyn JobProcessor> {
    Arc::new(FnProcessor::new(move |job: Job| async move {
        if job.attempts <= failures {
            Err(JobError::ExecutionFailed(format!("attempt {} failed", job.attempts)))
        } else {
            Ok(json!({"attempts": job.attempts}))
        }
    }))
}

/// Processor that waits for a permit from `gate` before succeeding.
pub fn gated_processor(gate: Arc<Semaphore>) -> Arc<dyn JobProcessor> {
    Arc::new(FnProcessor::new(move |_job: Job| {
        let gate = Arc::clone(&gate);
        async move {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| JobError::Internal(e.to_string()))?;
            permit.forget();
            Ok(json!({"ok": true}))
        }
    }))
}

/// Processor built from a closure.
pub fn processor<F, Fut>(f: F) -> Arc<dyn JobProcessor>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    Arc::new(FnProcessor::new(f))
}

/// Starts a service in fallback mode.
pub async fn fallback_service(
    settings: QueueSettings,
    processor: Arc<dyn JobProcessor>,
) -> (Arc<QueueService>, Arc<ScriptedProbe>, Arc<ScriptedConnector>) {
    let probe = ScriptedProbe::new(false);
    let connector = ScriptedConnector::new();
    let service =
        QueueService::start(settings, processor, probe.clone(), connector.clone()).await;
    (service, probe, connector)
}

/// Starts a service in durable mode.
pub async fn durable_service(
    settings: QueueSettings,
    processor: Arc<dyn JobProcessor>,
) -> (Arc<QueueService>, Arc<ScriptedProbe>, Arc<ScriptedConnector>) {
    let probe = ScriptedProbe::new(true);
    let connector = ScriptedConnector::new();
    let service =
        QueueService::start(settings, processor, probe.clone(), connector.clone()).await;
    (service, probe, connector)
}

/// Polls `condition` every 10 ms until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Log sink for asserting on what the queue reports.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Routes this thread's events at `WARN` and above into the sink until
    /// the guard drops. Current-thread test runtimes keep spawned tasks on
    /// the same thread, so worker events land here too.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
