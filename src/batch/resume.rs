//! Re-running the unfinished part of a stored batch.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{BatchId, BatchResults, JobStatus};

use super::BatchProcessor;

impl BatchProcessor {
    /// Re-process the `Pending` and `Failed` jobs of a stored batch
    ///
    /// The jobs run as a new batch named `"{name}_resumed"`, each at its stored priority.
    /// The returned `total` is the original batch's job count, so the result reports
    /// against the full scope rather than the resumed subset.
    pub async fn resume_batch(&self, batch_id: BatchId) -> Result<BatchResults> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("batch {batch_id}")))?;

        let jobs = self.store.get_batch_jobs(batch_id).await?;
        let unfinished: Vec<_> = jobs
            .into_iter()
            .filter(|job| matches!(job.status, JobStatus::Pending | JobStatus::Failed))
            .collect();

        tracing::info!(
            batch_id = %batch_id,
            name = %batch.name,
            unfinished = unfinished.len(),
            total = batch.total_jobs,
            "Resuming batch"
        );

        let urls: Vec<String> = unfinished.iter().map(|job| job.url.clone()).collect();
        let priorities: HashMap<String, _> = unfinished
            .iter()
            .map(|job| (job.url.clone(), job.priority))
            .collect();

        let mut results = self
            .process_batch(&format!("{}_resumed", batch.name), &urls, Some(&priorities))
            .await?;
        results.total = usize::try_from(batch.total_jobs).unwrap_or_default();
        Ok(results)
    }
}
