//! The persistence collaborator consumed by batch processing and recovery
//!
//! [`Database`](crate::db::Database) is the SQLite implementation. Embedders with their own
//! storage implement [`JobStore`] directly; implementations are expected to serialize their
//! own writes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Batch, BatchId, Job, JobId, JobStatus, Payload, Priority};

/// Durable record of batches and their jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Register a new batch in `Running` state
    async fn create_batch(
        &self,
        name: &str,
        total_jobs: i64,
        config: Option<&Payload>,
    ) -> Result<BatchId>;

    /// Register a new job for `batch_id` in `Pending` state
    async fn create_job(&self, url: &str, batch_id: BatchId, priority: Priority) -> Result<JobId>;

    /// Move a job to `status`, recording the error or result payload when given
    async fn update_job_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&Payload>,
    ) -> Result<()>;

    /// Overwrite the batch's completed and failed counters
    async fn update_batch_progress(
        &self,
        batch_id: BatchId,
        completed: i64,
        failed: i64,
    ) -> Result<()>;

    /// Set the batch status, stamping `completed_at` for terminal states
    async fn update_batch_status(&self, batch_id: BatchId, status: JobStatus) -> Result<()>;

    /// Fetch a batch, `None` if it does not exist
    async fn get_batch(&self, batch_id: BatchId) -> Result<Option<Batch>>;

    /// All jobs of a batch in creation order
    async fn get_batch_jobs(&self, batch_id: BatchId) -> Result<Vec<Job>>;

    /// Batches currently in `status`, oldest first
    async fn list_batches_by_status(&self, status: JobStatus) -> Result<Vec<Batch>>;

    /// Put a job back to `Pending`, clearing its error and bumping its retry count
    async fn reset_job(&self, job_id: JobId) -> Result<()>;
}
