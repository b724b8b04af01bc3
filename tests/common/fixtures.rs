//! Databases, processors and workers for integration tests

use scrape_scheduler::config::{BatchConfig, WorkerConfig};
use scrape_scheduler::worker::FnProcessor;
use scrape_scheduler::{BatchProcessor, Database, Error, Result, Worker};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Worker settings with no worker-level retries and short delays
pub fn quick_worker_config(max_concurrent: usize) -> WorkerConfig {
    WorkerConfig {
        max_concurrent,
        timeout: Duration::from_secs(5),
        retry_attempts: 0,
        retry_delay: Duration::from_millis(1),
        rate_limit_per_second: None,
    }
}

/// Succeeds unless the URL contains "fail"
pub async fn fail_marked(url: String) -> Result<Value> {
    if url.contains("fail") {
        Err(Error::Processing(format!("HTTP 500 for {url}")))
    } else {
        Ok(json!({ "url": url, "links": 3 }))
    }
}

/// A SQLite database in its own temp directory
pub async fn temp_database() -> (Arc<Database>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&dir.path().join("scheduler.db")).await.unwrap();
    (Arc::new(db), dir)
}

/// Batch processor running [`fail_marked`]
pub fn fail_marked_processor(db: Arc<Database>, config: BatchConfig) -> BatchProcessor {
    let worker = Worker::new(Arc::new(FnProcessor::new(fail_marked)), quick_worker_config(4));
    BatchProcessor::new(db, worker, config)
}
