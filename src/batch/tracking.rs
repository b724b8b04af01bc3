//! Per-URL execution with job records, progress counters and checkpoints.

use serde_json::json;

use crate::error::Result;
use crate::types::{Event, JobStatus, Priority, ProcessingResult};

use super::{BatchProcessor, BatchRun};

impl BatchProcessor {
    /// Run one URL of a batch
    ///
    /// Creates the job record, marks it running, executes it through the worker and
    /// persists the outcome. Batch progress is updated after every outcome and a
    /// checkpoint is written every `checkpoint_interval` outcomes; a failed checkpoint
    /// write is logged, not returned.
    ///
    /// Returns `Ok(None)` when the batch was cancelled before the URL finished.
    pub(crate) async fn process_with_tracking(
        &self,
        url: &str,
        priority: Priority,
        run: &BatchRun,
    ) -> Result<Option<ProcessingResult>> {
        if run.cancel.is_cancelled() {
            return Ok(None);
        }

        let job_id = self.store.create_job(url, run.batch_id, priority).await?;
        self.store
            .update_job_status(job_id, JobStatus::Running, None, None)
            .await?;

        let Some(result) = self
            .worker
            .process_until_cancelled(url, priority, &run.cancel)
            .await
        else {
            self.store
                .update_job_status(job_id, JobStatus::Cancelled, None, None)
                .await?;
            return Ok(None);
        };

        if result.success {
            self.store
                .update_job_status(job_id, JobStatus::Completed, None, result.data.as_ref())
                .await?;
            self.emit_event(Event::ItemCompleted {
                url: url.to_string(),
                batch_id: Some(run.batch_id),
                duration: result.duration.unwrap_or_default(),
            });
        } else {
            self.store
                .update_job_status(job_id, JobStatus::Failed, result.error.as_deref(), None)
                .await?;
            self.emit_event(Event::ItemFailed {
                url: url.to_string(),
                batch_id: Some(run.batch_id),
                error: result.error.clone().unwrap_or_default(),
                retries: result.retries,
            });
        }

        let _progress = self.counters.progress.lock().await;
        let (completed, failed) = self.counters.record(&result);
        self.store
            .update_batch_progress(run.batch_id, completed as i64, failed as i64)
            .await?;

        let interval = self.config.checkpoint_interval;
        if interval > 0 && (completed + failed) % interval == 0 {
            self.write_checkpoint(run, url, completed, failed).await;
        }

        Ok(Some(result))
    }

    async fn write_checkpoint(&self, run: &BatchRun, last_url: &str, completed: u64, failed: u64) {
        let Some(checkpoints) = &self.checkpoints else {
            return;
        };

        let state = json!({
            "completed": completed,
            "failed": failed,
            "total": run.total,
            "last_url": last_url,
        });
        match checkpoints.create_checkpoint(run.batch_id, &state).await {
            Ok(path) => {
                tracing::info!(
                    batch_id = %run.batch_id,
                    completed,
                    failed,
                    path = %path.display(),
                    "Checkpoint created"
                );
                self.emit_event(Event::CheckpointCreated {
                    batch_id: run.batch_id,
                    completed,
                    failed,
                });
            }
            Err(e) => {
                tracing::warn!(batch_id = %run.batch_id, error = %e, "Checkpoint write failed");
            }
        }
    }
}
