//! Lifecycle events.
//!
//! Published on a broadcast channel. Observers never affect job processing:
//! a slow subscriber only loses events, and publishing with no subscribers
//! is a no-op.

use crate::adapter::QueueMode;
use crate::job::JobId;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Something that happened to a job or to the queue.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum QueueEvent {
    /// A job was accepted by the gateway.
    #[serde(rename = "job:enqueued")]
    JobEnqueued { job_id: JobId, mode: QueueMode },

    /// A job finished successfully.
    #[serde(rename = "job:completed")]
    JobCompleted {
        job_id: JobId,
        attempts: u32,
        duration_ms: u64,
    },

    /// An attempt failed.
    #[serde(rename = "job:failed")]
    JobFailed {
        job_id: JobId,
        attempt: u32,
        error: String,
        will_retry: bool,
    },

    /// A job ran out of attempts and was recorded in the dead-letter sink.
    #[serde(rename = "job:dead-lettered")]
    JobDeadLettered {
        job_id: JobId,
        attempts: u32,
        reason: String,
    },

    /// The live adapter changed.
    #[serde(rename = "mode:changed")]
    ModeChanged {
        from: QueueMode,
        to: QueueMode,
        migrated: usize,
    },
}

impl QueueEvent {
    /// Event name as used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::JobEnqueued { .. } => "job:enqueued",
            QueueEvent::JobCompleted { .. } => "job:completed",
            QueueEvent::JobFailed { .. } => "job:failed",
            QueueEvent::JobDeadLettered { .. } => "job:dead-lettered",
            QueueEvent::ModeChanged { .. } => "mode:changed",
        }
    }
}

/// Cloneable handle to the event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event to current subscribers.
    pub fn publish(&self, event: QueueEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Spawns an observer that writes every event to the log.
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event @ QueueEvent::ModeChanged { .. }) => {
                    info!(event = event.name(), detail = ?event, "Queue event");
                }
                Ok(event @ QueueEvent::JobDeadLettered { .. }) => {
                    warn!(event = event.name(), detail = ?event, "Queue event");
                }
                Ok(event) => {
                    debug!(event = event.name(), detail = ?event, "Queue event");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
