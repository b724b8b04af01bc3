//! Continuous queue service split into focused submodules.
//!
//! The `QueueManager` struct and its methods are organized by domain:
//! - [`queue_ops`] - Admission, snapshot and restore
//! - [`queue_processor`] - The service loop and completion handling
//! - [`control`] - Pause and resume
//! - [`lifecycle`] - Shutdown coordination
//! - [`stats`] - Counters and status reporting

mod control;
mod lifecycle;
mod queue_ops;
mod queue_processor;
mod stats;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify, Semaphore, broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, QueueConfig, RetryConfig};
use crate::queue::PriorityQueue;
use crate::retry::RetryPolicy;
use crate::types::{Event, QueueStatus};

/// Queue and in-flight state shared by the service loop and its tasks
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Five-tier queue plus in-flight set and counters (protected by Mutex)
    pub(crate) queue: Arc<Mutex<PriorityQueue>>,
    /// Woken when an item is admitted
    pub(crate) work_available: Arc<Notify>,
    /// Woken when no item is in flight or waiting out a retry backoff
    pub(crate) drained: Arc<Notify>,
    /// Failed items waiting out their backoff before re-admission
    pub(crate) pending_requeues: Arc<AtomicUsize>,
    /// Bounds how many items the service loop runs at once
    pub(crate) concurrent_limit: Arc<Semaphore>,
}

/// Standing priority queue drained by a long-running service loop
///
/// Cloneable; all clones drive the same queue. Lifecycle:
/// `Idle -> Processing -> {Paused <-> Processing} -> Stopped`, with `Stopped` terminal.
#[derive(Clone)]
pub struct QueueManager {
    pub(crate) config: Arc<QueueConfig>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) queue_state: QueueState,
    /// Current lifecycle state; receivers wait on it while paused
    pub(crate) status_tx: Arc<watch::Sender<QueueStatus>>,
    /// Cancelled once shutdown begins
    pub(crate) shutdown_token: CancellationToken,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl QueueManager {
    /// Create an idle manager with an empty queue
    pub fn new(config: QueueConfig, retry: RetryConfig) -> Self {
        let queue = PriorityQueue::new(config.max_queue_size);
        let concurrent_limit = Arc::new(Semaphore::new(config.max_concurrent));
        let (status_tx, _status_rx) = watch::channel(QueueStatus::Idle);
        let (event_tx, _rx) = broadcast::channel(1000);

        Self {
            config: Arc::new(config),
            retry_policy: RetryPolicy::new(retry),
            queue_state: QueueState {
                queue: Arc::new(Mutex::new(queue)),
                work_available: Arc::new(Notify::new()),
                drained: Arc::new(Notify::new()),
                pending_requeues: Arc::new(AtomicUsize::new(0)),
                concurrent_limit,
            },
            status_tx: Arc::new(status_tx),
            shutdown_token: CancellationToken::new(),
            event_tx,
        }
    }

    /// Create a manager from the queue and retry sections of a full configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.queue.clone(), config.retry.clone())
    }

    /// Subscribe to queue events
    ///
    /// Each subscriber receives every event independently. A subscriber that falls more
    /// than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Whether nothing is in flight or pending re-admission
    ///
    /// Takes the queue so callers holding the lock get a consistent answer.
    pub(crate) fn is_drained(&self, queue: &crate::queue::PriorityQueue) -> bool {
        queue.in_flight() == 0 && self.queue_state.pending_requeues.load(Ordering::SeqCst) == 0
    }

    /// Emit an event to all subscribers; dropped silently when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
