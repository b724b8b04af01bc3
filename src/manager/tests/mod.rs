
use crate::config::{QueueConfig, RebalanceConfig, RetryConfig};
use crate::manager::QueueManager;
use crate::types::QueueStats;
use std::time::Duration;

/// Manager with millisecond backoffs and a fixed concurrency
pub(super) fn test_manager(max_concurrent: usize, max_retries: u32) -> QueueManager {
    QueueManager::new(
        QueueConfig {
            max_queue_size: 100,
            max_concurrent,
            rebalance: RebalanceConfig::default(),
        },
        RetryConfig {
            max_retries_per_item: max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Some(Duration::from_millis(10)),
            jitter: false,
        },
    )
}

/// Poll statistics until `done` holds, failing the test after five seconds
pub(super) async fn wait_for_stats<F>(manager: &QueueManager, done: F) -> QueueStats
where
    F: Fn(&QueueStats) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = manager.get_statistics().await;
        if done(&stats) {
            return stats;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for statistics, last: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
