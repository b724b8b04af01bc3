//! Waiting helpers for integration tests

use scrape_scheduler::{Event, QueueManager, QueueStats};
use std::time::Duration;
use tokio::sync::broadcast;

/// Collect events until the predicate matches or the timeout expires
pub async fn collect_events_until<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    stop_predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let should_stop = stop_predicate(&event);
            collected.push(event);
            if should_stop {
                break;
            }
        }
    })
    .await;

    collected
}

/// Poll manager statistics until the predicate holds; panics after `timeout`
pub async fn wait_for_stats<F>(manager: &QueueManager, timeout: Duration, done: F) -> QueueStats
where
    F: Fn(&QueueStats) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let stats = manager.get_statistics().await;
        if done(&stats) {
            return stats;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for queue statistics, last: {stats:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
