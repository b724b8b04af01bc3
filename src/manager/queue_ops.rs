//! Queue admission and state dump/reload.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::queue::QueueSnapshot;
use crate::types::{BatchId, Priority};

use super::QueueManager;

impl QueueManager {
    /// Admit a URL into the queue
    ///
    /// Returns `Ok(false)` when the queue is full; the caller decides whether to try again
    /// later. Fails with [`Error::ShuttingDown`] once shutdown has begun.
    ///
    /// # Examples
    ///
    /// ```
    /// # use scrape_scheduler::*;
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<()> {
    /// let manager = QueueManager::from_config(&Config::default());
    /// assert!(manager.add_job("https://example.com/a", Priority::High, None, None).await?);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn add_job(
        &self,
        url: impl Into<String>,
        priority: Priority,
        batch_id: Option<BatchId>,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<bool> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let url = url.into();
        let accepted = {
            let mut queue = self.queue_state.queue.lock().await;
            queue.add(url.clone(), priority, batch_id, metadata)
        };

        if accepted {
            tracing::debug!(url = %url, %priority, "Item admitted");
            self.queue_state.work_available.notify_one();
        } else {
            tracing::debug!(url = %url, "Queue full, item rejected");
        }
        Ok(accepted)
    }

    /// Admit several URLs at one priority, stopping at the first rejection
    ///
    /// Returns how many were admitted.
    pub async fn add_batch<I, S>(
        &self,
        urls: I,
        priority: Priority,
        batch_id: Option<BatchId>,
    ) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let added = {
            let mut queue = self.queue_state.queue.lock().await;
            queue.add_batch(urls, priority, batch_id)
        };

        if added > 0 {
            tracing::debug!(added, %priority, "Items admitted");
            self.queue_state.work_available.notify_one();
        }
        Ok(added)
    }

    /// Dump the waiting items, in-flight items and counters
    pub async fn snapshot(&self) -> QueueSnapshot {
        self.queue_state.queue.lock().await.snapshot()
    }

    /// Replace the queue contents with a snapshot
    ///
    /// Items in flight at snapshot time never reported an outcome, so they are queued
    /// again. Call this before starting the service loop.
    pub async fn restore(&self, snapshot: QueueSnapshot) {
        let restored = snapshot.items.len() + snapshot.in_flight.len();
        self.queue_state.queue.lock().await.restore(snapshot);
        tracing::info!(restored, "Queue restored from snapshot");
        self.queue_state.work_available.notify_one();
    }

    /// Run one age-based promotion sweep now, returning how many items moved up
    pub async fn rebalance(&self) -> usize {
        let mut queue = self.queue_state.queue.lock().await;
        queue.rebalance(&self.config.rebalance, chrono::Utc::now())
    }
}
