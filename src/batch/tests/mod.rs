
use crate::batch::BatchProcessor;
use crate::config::{BatchConfig, WorkerConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::Payload;
use crate::worker::{FnProcessor, Worker};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

pub(super) fn worker_config(max_concurrent: usize) -> WorkerConfig {
    WorkerConfig {
        max_concurrent,
        timeout: Duration::from_secs(5),
        retry_attempts: 0,
        retry_delay: Duration::from_millis(1),
        rate_limit_per_second: None,
    }
}

/// Processor that fails every URL containing "fail"
pub(super) async fn failing_on_marker(url: String) -> Result<Payload> {
    if url.contains("fail") {
        Err(Error::Processing(format!("refused {url}")))
    } else {
        Ok(serde_json::json!({ "url": url }))
    }
}

/// Batch processor over a throwaway SQLite database
pub(super) async fn setup<F, Fut>(
    processor: F,
    max_concurrent: usize,
    config: BatchConfig,
) -> (BatchProcessor, Arc<Database>, NamedTempFile)
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload>> + Send + 'static,
{
    let temp_file = NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(temp_file.path()).await.unwrap());
    let worker = Worker::new(
        Arc::new(FnProcessor::new(processor)),
        worker_config(max_concurrent),
    );
    let processor = BatchProcessor::new(db.clone(), worker, config);
    (processor, db, temp_file)
}
