//! In-process fallback queue.
//!
//! Used whenever the durable backend is unreachable. Jobs live only in this
//! process and are lost on restart. Retries with a delay are parked in a
//! due-time list and promoted on the next dequeue; no timers are spawned.

use crate::adapter::{DeadLetterRecord, QueueAdapter, QueueMode};
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

struct DelayedJob {
    due: Instant,
    job: Job,
}

#[derive(Default)]
struct MemoryState {
    ready: VecDeque<Job>,
    delayed: Vec<DelayedJob>,
    dead: Vec<DeadLetterRecord>,
}

impl MemoryState {
    /// Moves every delayed job whose due time has passed onto the ready queue,
    /// earliest first.
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|d| d.due);
        let split = self.delayed.partition_point(|d| d.due <= now);
        for delayed in self.delayed.drain(..split) {
            self.ready.push_back(delayed.job);
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|d| d.due).min()
    }
}

/// A job taken out of the memory queue during a hand-off.
#[derive(Debug, Clone)]
pub struct DrainedJob {
    pub job: Job,
    /// Time left before a delayed retry is due; zero for ready jobs.
    pub remaining: Duration,
}

/// FIFO queue held in process memory.
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    notify: Notify,
    closed: AtomicBool,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true once [`QueueAdapter::close`] or [`MemoryQueue::shut`] ran.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuses new jobs and wakes every waiting consumer.
    pub fn shut(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Accepts jobs again after an aborted hand-off.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Removes and returns every job that has not started yet, ready jobs
    /// first (in order) followed by delayed retries (earliest first).
    pub fn drain(&self) -> Vec<DrainedJob> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut jobs: Vec<DrainedJob> = state
            .ready
            .drain(..)
            .map(|job| DrainedJob {
                job,
                remaining: Duration::ZERO,
            })
            .collect();
        state.delayed.sort_by_key(|d| d.due);
        jobs.extend(state.delayed.drain(..).map(|d| DrainedJob {
            remaining: d.due.saturating_duration_since(now),
            job: d.job,
        }));
        jobs
    }

    /// Puts drained jobs back: ready jobs at the head of the queue in their
    /// original order, delayed ones with their remaining delay.
    pub fn restore(&self, jobs: Vec<DrainedJob>) {
        let count = jobs.len();
        {
            let now = Instant::now();
            let mut state = self.state.lock();
            let (ready, delayed): (Vec<_>, Vec<_>) =
                jobs.into_iter().partition(|d| d.remaining.is_zero());
            for drained in ready.into_iter().rev() {
                state.ready.push_front(drained.job);
            }
            state.delayed.extend(delayed.into_iter().map(|d| DelayedJob {
                due: now + d.remaining,
                job: d.job,
            }));
        }
        debug!(count, "Restored jobs to memory queue");
        self.notify.notify_waiters();
    }

    /// Removes and returns the dead-letter records, oldest first.
    pub fn take_dead_letters(&self) -> Vec<DeadLetterRecord> {
        std::mem::take(&mut self.state.lock().dead)
    }

    /// Puts dead-letter records back, oldest first.
    pub fn restore_dead_letters(&self, records: Vec<DeadLetterRecord>) {
        let mut state = self.state.lock();
        let newer = std::mem::replace(&mut state.dead, records);
        state.dead.extend(newer);
    }

    /// Jobs waiting to run.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }

    /// Returns true if no jobs are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn closed_error() -> JobError {
        JobError::AdapterClosed("memory queue no longer accepts jobs".to_string())
    }
}

#[async_trait]
impl QueueAdapter for MemoryQueue {
    fn mode(&self) -> QueueMode {
        QueueMode::Fallback
    }

    async fn enqueue(&self, job: Job) -> JobResult<JobId> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        let id = job.id.clone();
        self.state.lock().ready.push_back(job);
        self.notify.notify_one();
        debug!(job_id = %id, "Enqueued job in memory");
        Ok(id)
    }

    async fn dequeue(&self, wait: Duration) -> JobResult<Option<Job>> {
        let deadline = Instant::now() + wait;

        loop {
            if self.is_closed() {
                return Ok(None);
            }

            let next_due = {
                let mut state = self.state.lock();
                state.promote_due(Instant::now());
                if let Some(job) = state.ready.pop_front() {
                    return Ok(Some(job));
                }
                state.next_due()
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn complete(&self, _job: &Job) -> JobResult<()> {
        Ok(())
    }

    async fn retry(&self, job: Job, delay: Duration) -> JobResult<()> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        {
            let mut state = self.state.lock();
            if delay.is_zero() {
                state.ready.push_back(job);
            } else {
                state.delayed.push(DelayedJob {
                    due: Instant::now() + delay,
                    job,
                });
            }
        }
        // Sleeping consumers recompute their wake-up time.
        self.notify.notify_waiters();
        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, record: DeadLetterRecord) -> JobResult<()> {
        self.state.lock().dead.push(record);
        Ok(())
    }

    async fn depth(&self) -> JobResult<u64> {
        Ok(self.len() as u64)
    }

    async fn dead_letters(&self, limit: usize) -> JobResult<Vec<DeadLetterRecord>> {
        let state = self.state.lock();
        Ok(state.dead.iter().rev().take(limit).cloned().collect())
    }

    async fn close(&self) -> JobResult<()> {
        self.shut();
        Ok(())
    }
}
