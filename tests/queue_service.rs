//! End-to-end runs of the standing queue service
//!
//! Covers admission limits, retry exhaustion, statistics and carrying queue contents
//! across a restart through the database.

mod common;

use common::{collect_events_until, fail_marked, quick_worker_config, temp_database, wait_for_stats};
use scrape_scheduler::config::{QueueConfig, RetryConfig};
use scrape_scheduler::worker::FnProcessor;
use scrape_scheduler::{Event, Priority, QueueManager, QueueStatus, Worker};
use std::sync::Arc;
use std::time::Duration;

fn manager(max_queue_size: usize, max_retries_per_item: u32) -> QueueManager {
    QueueManager::new(
        QueueConfig {
            max_queue_size,
            max_concurrent: 2,
            ..QueueConfig::default()
        },
        RetryConfig {
            max_retries_per_item,
            base_delay: Duration::from_millis(1),
            max_delay: Some(Duration::from_millis(20)),
            jitter: true,
        },
    )
}

fn fail_marked_worker() -> Worker {
    Worker::new(Arc::new(FnProcessor::new(fail_marked)), quick_worker_config(2))
}

#[tokio::test]
async fn test_admission_stops_at_capacity() {
    let manager = manager(5, 0);

    for i in 0..5 {
        assert!(
            manager
                .add_job(format!("https://x/{i}"), Priority::Normal, None, None)
                .await
                .unwrap()
        );
    }
    assert!(
        !manager
            .add_job("https://x/5", Priority::Normal, None, None)
            .await
            .unwrap()
    );
    assert_eq!(manager.size().await, 5);
}

#[tokio::test]
async fn test_service_processes_and_abandons() {
    let manager = manager(100, 2);
    let mut events = manager.subscribe();

    manager
        .add_batch(["https://x/a", "https://x/fail", "https://x/b"], Priority::High, None)
        .await
        .unwrap();

    let runner = manager.clone();
    let handle = tokio::spawn(async move { runner.process_with_worker(fail_marked_worker()).await });

    let collected = collect_events_until(&mut events, Duration::from_secs(5), |event| {
        matches!(event, Event::ItemAbandoned { .. })
    })
    .await;
    assert!(collected
        .iter()
        .any(|e| matches!(e, Event::ItemAbandoned { url, retry_count: 2 } if url == "https://x/fail")));

    let stats = wait_for_stats(&manager, Duration::from_secs(5), |s| s.total_processed == 2).await;
    assert_eq!(stats.total_failed, 3);
    assert_eq!(stats.failed_items, 1);
    assert!((stats.success_rate - 40.0).abs() < 1e-9);

    manager.shutdown().await;
    handle.await.unwrap().unwrap();
    assert_eq!(manager.status(), QueueStatus::Stopped);
}

#[tokio::test]
async fn test_queue_survives_restart_through_database() {
    let (db, _dir) = temp_database().await;

    let first = manager(100, 3);
    first
        .add_job("https://x/later", Priority::Low, None, None)
        .await
        .unwrap();
    first
        .add_job("https://x/soon", Priority::Urgent, None, None)
        .await
        .unwrap();
    db.set_clean_start().await.unwrap();
    first.shutdown().await;
    db.save_queue_snapshot(&first.snapshot().await).await.unwrap();
    db.set_clean_shutdown().await.unwrap();

    assert!(!db.was_unclean_shutdown().await.unwrap());
    let snapshot = db.load_queue_snapshot().await.unwrap().unwrap();

    let second = manager(100, 3);
    second.restore(snapshot).await;
    let stats = second.get_statistics().await;
    assert_eq!(stats.total_size, 2);
    assert_eq!(stats.tier_sizes[&Priority::Urgent], 1);
    assert_eq!(stats.status, QueueStatus::Idle);
}
