//! Counters and status reporting.

use std::collections::BTreeMap;

use crate::types::{Priority, QueueStats, success_rate};

use super::QueueManager;

impl QueueManager {
    /// Snapshot of queue sizes and outcome counters
    pub async fn get_statistics(&self) -> QueueStats {
        let queue = self.queue_state.queue.lock().await;

        let tier_sizes: BTreeMap<Priority, usize> = Priority::ALL
            .iter()
            .map(|&priority| (priority, queue.tier_len(priority)))
            .collect();
        let total_processed = queue.total_processed();
        let total_failed = queue.total_failed();

        QueueStats {
            status: self.status(),
            tier_sizes,
            total_size: queue.size(),
            in_flight: queue.in_flight(),
            total_processed,
            total_failed,
            failed_items: queue.failed_items().len(),
            success_rate: success_rate(total_processed, total_failed),
        }
    }

    /// Items waiting across all tiers
    pub async fn size(&self) -> usize {
        self.queue_state.queue.lock().await.size()
    }

    /// URLs that exhausted their retries, with their final retry count
    pub async fn failed_items(&self) -> Vec<(String, u32)> {
        let queue = self.queue_state.queue.lock().await;
        let mut failed: Vec<(String, u32)> = queue
            .failed_items()
            .iter()
            .map(|(url, count)| (url.clone(), *count))
            .collect();
        failed.sort();
        failed
    }
}
