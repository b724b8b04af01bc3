//! End-to-end batch runs against a real SQLite database
//!
//! Covers a full run, partial failure, strict abort, resume of an unfinished batch and
//! the detect-analyze-recover path after a crash.

mod common;

use common::{fail_marked_processor, temp_database};
use scrape_scheduler::config::BatchConfig;
use scrape_scheduler::{
    CheckpointManager, Error, JobStatus, JobStore, Priority, RecoveryManager, RecoveryStrategy,
};

#[tokio::test]
async fn test_batch_all_succeed() {
    let (db, _dir) = temp_database().await;
    let processor = fail_marked_processor(db.clone(), BatchConfig::default());

    let results = processor
        .process_batch("b1", &["https://x/1", "https://x/2", "https://x/3"], None)
        .await
        .unwrap();

    assert_eq!(results.total, 3);
    assert_eq!(results.successful.len(), 3);
    assert_eq!(results.failed.len(), 0);
    assert_eq!(results.classified(), results.total);
}

#[tokio::test]
async fn test_batch_partial_failure() {
    let (db, _dir) = temp_database().await;
    let processor = fail_marked_processor(db.clone(), BatchConfig::default());

    let results = processor
        .process_batch("b2", &["ok1", "fail1", "ok2"], None)
        .await
        .unwrap();

    assert_eq!(results.successful, vec!["ok1", "ok2"]);
    assert_eq!(results.failed, vec!["fail1"]);

    let stats = processor.get_statistics();
    assert_eq!(stats.total_processed, 3);
    assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_batch_strict_mode_raises() {
    let (db, _dir) = temp_database().await;
    let processor = fail_marked_processor(
        db.clone(),
        BatchConfig {
            continue_on_error: false,
            ..BatchConfig::default()
        },
    );

    let result = processor
        .process_batch("b3", &["ok1", "fail1", "ok2"], None)
        .await;

    assert!(matches!(result, Err(Error::BatchFailed { ref url, .. }) if url == "fail1"));
}

#[tokio::test]
async fn test_resume_reports_against_original_total() {
    let (db, _dir) = temp_database().await;
    let processor = fail_marked_processor(db.clone(), BatchConfig::default());

    let batch_id = db.create_batch("crawl", 5, None).await.unwrap();
    for (url, status) in [
        ("https://x/1", JobStatus::Completed),
        ("https://x/2", JobStatus::Completed),
        ("https://x/3", JobStatus::Completed),
        ("https://x/4", JobStatus::Failed),
        ("https://x/5", JobStatus::Pending),
    ] {
        let job = db.create_job(url, batch_id, Priority::Normal).await.unwrap();
        if status != JobStatus::Pending {
            db.update_job_status(job, status, Some("earlier error"), None)
                .await
                .unwrap();
        }
    }

    let results = processor.resume_batch(batch_id).await.unwrap();
    assert_eq!(results.total, 5);
    assert_eq!(results.successful, vec!["https://x/4", "https://x/5"]);
}

#[tokio::test]
async fn test_crash_detect_analyze_recover() {
    let (db, dir) = temp_database().await;
    let checkpoints = CheckpointManager::new(dir.path().join("checkpoints"));

    // A batch that died mid-run: 7 done, 2 failed, 1 never started
    let batch_id = db.create_batch("nightly", 10, None).await.unwrap();
    for i in 0..10 {
        let url = format!("https://x/{i}");
        let job = db.create_job(&url, batch_id, Priority::Normal).await.unwrap();
        match i {
            0..=6 => db
                .update_job_status(job, JobStatus::Completed, None, None)
                .await
                .unwrap(),
            7 | 8 => db
                .update_job_status(job, JobStatus::Failed, Some("Timeout after 30 seconds"), None)
                .await
                .unwrap(),
            _ => {}
        }
    }

    let recovery = RecoveryManager::new(db.clone()).with_checkpoints(checkpoints);

    let interrupted = recovery.find_interrupted_batches().await.unwrap();
    assert_eq!(interrupted.len(), 1);
    assert_eq!(interrupted[0].batch.id, batch_id);
    assert_eq!(interrupted[0].pending_jobs, 1);

    let analysis = recovery.analyze_failure(batch_id).await.unwrap();
    assert_eq!(analysis.completion_rate, 70.0);
    assert_eq!(analysis.recommended_strategy, RecoveryStrategy::ResumePending);

    let plan = recovery.create_recovery_plan(batch_id).await.unwrap();
    assert_eq!(plan.steps.len(), 3);
    assert!(plan.success_probability >= 0.1 && plan.success_probability <= 0.95);

    let processor = fail_marked_processor(db.clone(), BatchConfig::default());
    let results = recovery
        .recover_batch(batch_id, plan.strategy, Some(&processor))
        .await
        .unwrap();
    assert_eq!(results.successful, vec!["https://x/9"]);

    // The original batch is finished and no longer looks interrupted
    let batch = db.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, JobStatus::Completed);
    assert!(recovery.find_interrupted_batches().await.unwrap().is_empty());
}
