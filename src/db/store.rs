//! [`JobStore`] implementation backed by the inherent query methods.

use async_trait::async_trait;

use crate::persistence::JobStore;
use crate::types::{Batch, BatchId, Job, JobId, JobStatus, Payload, Priority};
use crate::Result;

use super::Database;

#[async_trait]
impl JobStore for Database {
    async fn create_batch(
        &self,
        name: &str,
        total_jobs: i64,
        config: Option<&Payload>,
    ) -> Result<BatchId> {
        self.insert_batch(name, total_jobs, config).await
    }

    async fn create_job(&self, url: &str, batch_id: BatchId, priority: Priority) -> Result<JobId> {
        self.insert_job(url, batch_id, priority).await
    }

    async fn update_job_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&Payload>,
    ) -> Result<()> {
        self.set_job_status(job_id, status, error, result).await
    }

    async fn update_batch_progress(
        &self,
        batch_id: BatchId,
        completed: i64,
        failed: i64,
    ) -> Result<()> {
        self.set_batch_progress(batch_id, completed, failed).await
    }

    async fn update_batch_status(&self, batch_id: BatchId, status: JobStatus) -> Result<()> {
        self.set_batch_status(batch_id, status).await
    }

    async fn get_batch(&self, batch_id: BatchId) -> Result<Option<Batch>> {
        Ok(self.get_batch_row(batch_id).await?.map(Batch::from))
    }

    async fn get_batch_jobs(&self, batch_id: BatchId) -> Result<Vec<Job>> {
        let rows = self.list_job_rows(batch_id).await?;
        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn list_batches_by_status(&self, status: JobStatus) -> Result<Vec<Batch>> {
        let rows = self.list_batch_rows_by_status(status).await?;
        Ok(rows.into_iter().map(Batch::from).collect())
    }

    async fn reset_job(&self, job_id: JobId) -> Result<()> {
        self.reset_job_to_pending(job_id).await
    }
}
