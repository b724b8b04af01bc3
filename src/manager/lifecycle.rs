//! Shutdown coordination.

use crate::types::{Event, QueueStatus};

use super::QueueManager;

impl QueueManager {
    /// Gracefully shut down the service loop
    ///
    /// 1. Signals shutdown, which stops admission and wakes the idle loop
    /// 2. Waits until every in-flight item has reported its outcome
    /// 3. Moves to `Stopped`, a terminal state
    ///
    /// Items still waiting in the queue stay there and can be captured with
    /// [`snapshot`](Self::snapshot). Calling this again after it returned is a no-op.
    pub async fn shutdown(&self) {
        if self.status() == QueueStatus::Stopped {
            return;
        }

        tracing::info!("Initiating queue shutdown");
        self.shutdown_token.cancel();
        self.queue_state.work_available.notify_waiters();

        self.wait_for_drain().await;

        let stopped = self.status_tx.send_if_modified(|status| {
            if *status == QueueStatus::Stopped {
                false
            } else {
                *status = QueueStatus::Stopped;
                true
            }
        });

        if stopped {
            self.emit_event(Event::Shutdown);
            tracing::info!("Queue shutdown complete");
        }
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Wait until nothing is in flight or waiting on a retry backoff
    async fn wait_for_drain(&self) {
        loop {
            let notified = self.queue_state.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (in_flight, drained) = {
                let queue = self.queue_state.queue.lock().await;
                (queue.in_flight(), self.is_drained(&queue))
            };
            if drained {
                return;
            }

            tracing::debug!(in_flight, "Waiting for in-flight items to finish");
            notified.await;
        }
    }
}
