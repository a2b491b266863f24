//! crawlq Jobs - Resilient Job Queue
//!
//! A job queue that prefers a durable Redis backend and keeps working when
//! Redis is down:
//! - Startup connectivity probe choosing durable or in-memory fallback mode
//! - Background recovery probe that hands buffered jobs over to Redis
//! - Bounded worker pool with per-job timeouts
//! - Retries with fixed or exponential backoff, then a dead-letter sink
//! - Atomic counters with a Prometheus mirror
//! - Lifecycle events on a broadcast channel
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        QueueService                          │
//! │                                                              │
//! │  enqueue ──▶ ┌──────────────────────────────────────────┐    │
//! │              │            ModeController                │    │
//! │              │   live adapter (RwLock)   recovery probe │    │
//! │              │     ┌───────────┐      ┌─────────────┐   │    │
//! │              │     │ RedisQueue│ ◀─── │ MemoryQueue │   │    │
//! │              │     │ (durable) │drain │ (fallback)  │   │    │
//! │              │     └─────┬─────┘      └──────┬──────┘   │    │
//! │              └───────────┼───────────────────┼──────────┘    │
//! │                          └─────────┬─────────┘               │
//! │                                    ▼                         │
//! │              ┌──────────────────────────────────────────┐    │
//! │              │               WorkerPool                 │    │
//! │              │  semaphore(concurrency) + job timeout    │    │
//! │              └───────┬──────────────┬───────────────────┘    │
//! │                      ▼              ▼                        │
//! │                 completed    retry ──▶ dead-letter           │
//! │                                                              │
//! │   MetricsRegistry ◀── counters        EventBus ──▶ observers │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use crawlq_jobs::{EnqueueRequest, FnProcessor, QueueService};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let processor = Arc::new(FnProcessor::new(|job| async move {
//!     crawl(&job.payload).await
//! }));
//! let service = QueueService::connect(&config, processor).await;
//!
//! let receipt = service
//!     .enqueue(EnqueueRequest::with_payload(json!({"url": "https://example.com"})))
//!     .await?;
//! println!("{} (fallback: {})", receipt.job_id, receipt.using_fallback);
//!
//! service.shutdown().await;
//! ```

pub mod adapter;
pub mod controller;
pub mod error;
pub mod events;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod probe;
pub mod redis;
pub mod retry;
pub mod service;
pub mod worker;

pub use adapter::{DeadLetterRecord, QueueAdapter, QueueMode};
pub use controller::{DurableConnector, ModeController};
pub use error::{JobError, JobResult};
pub use events::{spawn_event_logger, EventBus, QueueEvent};
pub use job::{Job, JobId, JobStatus};
pub use memory::{DrainedJob, MemoryQueue};
pub use metrics::{register_metrics, MetricsRegistry, MetricsSnapshot};
pub use probe::{probe, ConnectivityProbe, TcpProbe};
pub use redis::{RedisConnector, RedisQueue};
pub use retry::BackoffPolicy;
pub use service::{EnqueueReceipt, EnqueueRequest, HealthReport, QueueService, QueueSettings};
pub use worker::{FnProcessor, JobProcessor, WorkerPool, WorkerPoolConfig};
