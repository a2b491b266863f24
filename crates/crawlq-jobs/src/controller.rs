//! Durable/fallback mode selection.
//!
//! The controller owns the single "live" adapter that receives new jobs.
//!
//! ```text
//!            probe ok + connect ok
//!  Probing ─────────────────────────▶ Durable  (terminal)
//!     │                                  ▲
//!     │ unreachable / connect failed     │ recovery probe ok,
//!     ▼                                  │ memory drained into durable
//!  Fallback ─────────────────────────────┘
//! ```
//!
//! Once durable, the controller never probes again and never falls back.
//! Enqueues hold a read lock on the live adapter for their whole duration;
//! the switch takes the write lock, so no enqueue can land in the memory
//! queue after its contents have been handed over.

use crate::adapter::{DeadLetterRecord, QueueAdapter, QueueMode};
use crate::error::JobResult;
use crate::events::{EventBus, QueueEvent};
use crate::job::{Job, JobId};
use crate::memory::MemoryQueue;
use crate::probe::ConnectivityProbe;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Opens a client for the durable backend.
#[async_trait]
pub trait DurableConnector: Send + Sync {
    /// Connects and verifies the backend, returning a ready adapter.
    async fn connect(&self) -> JobResult<Arc<dyn QueueAdapter>>;
}

struct LiveAdapter {
    mode: QueueMode,
    adapter: Arc<dyn QueueAdapter>,
}

/// Chooses and switches the live queue adapter.
pub struct ModeController {
    live: RwLock<LiveAdapter>,
    fallback: AtomicBool,
    memory: Arc<MemoryQueue>,
    probe: Arc<dyn ConnectivityProbe>,
    connector: Arc<dyn DurableConnector>,
    events: EventBus,
}

impl ModeController {
    /// Probes the backend once and settles on an initial mode.
    ///
    /// Never fails: an unreachable backend or a client that refuses to
    /// initialize both yield fallback mode.
    pub async fn start(
        probe: Arc<dyn ConnectivityProbe>,
        connector: Arc<dyn DurableConnector>,
        events: EventBus,
    ) -> Self {
        let memory = Arc::new(MemoryQueue::new());
        let target = probe.target();
        info!(target = %target, "Probing durable backend");

        let durable = if probe.is_reachable().await {
            match connector.connect().await {
                Ok(adapter) => Some(adapter),
                Err(e) => {
                    warn!(
                        target = %target,
                        error = %e,
                        "Durable backend reachable but client failed to initialize; \
                         using in-memory fallback (jobs are lost on restart)"
                    );
                    None
                }
            }
        } else {
            warn!(
                target = %target,
                "Durable backend unreachable; using in-memory fallback (jobs are lost on restart)"
            );
            None
        };

        let live = match durable {
            Some(adapter) => {
                info!(target = %target, "Queue running in durable mode");
                LiveAdapter {
                    mode: QueueMode::Durable,
                    adapter,
                }
            }
            None => LiveAdapter {
                mode: QueueMode::Fallback,
                adapter: memory.clone(),
            },
        };

        Self {
            fallback: AtomicBool::new(live.mode == QueueMode::Fallback),
            live: RwLock::new(live),
            memory,
            probe,
            connector,
            events,
        }
    }

    /// Current mode, without waiting on a switch in progress.
    pub fn mode(&self) -> QueueMode {
        if self.is_fallback() {
            QueueMode::Fallback
        } else {
            QueueMode::Durable
        }
    }

    /// Returns true while the in-memory fallback is live.
    pub fn is_fallback(&self) -> bool {
        self.fallback.load(Ordering::SeqCst)
    }

    /// The adapter that currently receives new jobs.
    pub async fn current(&self) -> Arc<dyn QueueAdapter> {
        Arc::clone(&self.live.read().await.adapter)
    }

    /// The in-memory fallback queue.
    pub fn memory(&self) -> &Arc<MemoryQueue> {
        &self.memory
    }

    /// Stores a job in the live adapter and reports which mode took it.
    ///
    /// A durable failure is returned to the caller; the job is never
    /// silently diverted to memory.
    pub async fn enqueue(&self, job: Job) -> JobResult<(JobId, QueueMode)> {
        let live = self.live.read().await;
        let id = live.adapter.enqueue(job).await?;
        Ok((id, live.mode))
    }

    /// Schedules a retry on the live adapter.
    pub async fn retry(&self, job: Job, delay: Duration) -> JobResult<()> {
        let live = self.live.read().await;
        live.adapter.retry(job, delay).await
    }

    /// Writes a dead-letter record to the live adapter.
    pub async fn dead_letter(&self, record: DeadLetterRecord) -> JobResult<()> {
        let live = self.live.read().await;
        live.adapter.dead_letter(record).await
    }

    /// Jobs waiting in the live adapter.
    pub async fn depth(&self) -> JobResult<u64> {
        let live = self.live.read().await;
        live.adapter.depth().await
    }

    /// Newest dead-letter records from the live adapter, followed by any the
    /// memory queue could not hand over.
    pub async fn dead_letters(&self, limit: usize) -> JobResult<Vec<DeadLetterRecord>> {
        let live = self.live.read().await;
        let mut records = live.adapter.dead_letters(limit).await?;
        if live.mode == QueueMode::Durable && records.len() < limit {
            records.extend(self.memory.dead_letters(limit - records.len()).await?);
        }
        Ok(records)
    }

    /// Checks backend reachability without changing mode.
    pub async fn probe_backend(&self) -> bool {
        self.probe.is_reachable().await
    }

    /// Runs one recovery cycle. Returns `Ok(true)` if the controller switched
    /// to durable mode.
    ///
    /// On a successful probe the memory queue is closed, drained, and its
    /// jobs re-enqueued on the durable adapter under the write lock. Delayed
    /// retries are handed over as retries with their remaining delay. If the
    /// durable adapter refuses a job, every job not yet handed over goes
    /// back to memory and the controller stays in fallback.
    pub async fn try_recover(&self) -> JobResult<bool> {
        if !self.is_fallback() {
            return Ok(false);
        }

        if !self.probe.is_reachable().await {
            debug!(target = %self.probe.target(), "Durable backend still unreachable");
            return Ok(false);
        }

        let durable = self.connector.connect().await?;

        let mut live = self.live.write().await;
        if live.mode == QueueMode::Durable {
            let _ = durable.close().await;
            return Ok(false);
        }

        self.memory.shut();
        let jobs = self.memory.drain();
        let migrated = jobs.len();

        let mut pending = jobs.into_iter();
        while let Some(drained) = pending.next() {
            // Delayed retries keep the rest of their backoff.
            let handed_over = if drained.remaining.is_zero() {
                durable.enqueue(drained.job.clone()).await.map(|_| ())
            } else {
                durable.retry(drained.job.clone(), drained.remaining).await
            };
            if let Err(e) = handed_over {
                let mut remaining = vec![drained];
                remaining.extend(pending);
                warn!(
                    error = %e,
                    returned = remaining.len(),
                    "Durable backend refused migrated job; staying in fallback mode"
                );
                self.memory.restore(remaining);
                self.memory.reopen();
                let _ = durable.close().await;
                return Err(e);
            }
        }

        let mut unmoved = Vec::new();
        for record in self.memory.take_dead_letters() {
            if let Err(e) = durable.dead_letter(record.clone()).await {
                error!(
                    job_id = %record.job.id,
                    error = %e,
                    "Failed to move dead-letter record to durable backend; keeping it in memory"
                );
                unmoved.push(record);
            }
        }
        if !unmoved.is_empty() {
            self.memory.restore_dead_letters(unmoved);
        }

        *live = LiveAdapter {
            mode: QueueMode::Durable,
            adapter: durable,
        };
        self.fallback.store(false, Ordering::SeqCst);
        drop(live);

        info!(migrated, "Durable backend recovered; switched to durable mode");
        self.events.publish(QueueEvent::ModeChanged {
            from: QueueMode::Fallback,
            to: QueueMode::Durable,
            migrated,
        });

        Ok(true)
    }

    /// Spawns the recovery loop, probing every `interval` while in fallback.
    ///
    /// The loop ends when durable mode is established or on shutdown.
    pub fn spawn_recovery(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            if !controller.is_fallback() {
                return;
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("Recovery probe stopped by shutdown");
                        break;
                    }
                    _ = ticker.tick() => {
                        match controller.try_recover().await {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(e) => warn!(
                                error = %e,
                                "Durable backend recovery failed; staying in fallback mode"
                            ),
                        }
                    }
                }
            }
        })
    }

    /// Closes the live adapter and the memory queue.
    pub async fn close(&self) -> JobResult<()> {
        let live = self.live.read().await;
        let left_behind = self.memory.len();
        if left_behind > 0 {
            warn!(
                count = left_behind,
                "Discarding jobs still held in the in-memory fallback"
            );
        }
        self.memory.shut();
        if live.mode == QueueMode::Durable {
            live.adapter.close().await?;
        }
        Ok(())
    }
}

