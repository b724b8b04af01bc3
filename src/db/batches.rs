//! Batch records and progress counters.

use crate::error::DatabaseError;
use crate::types::{BatchId, JobStatus, Payload};
use crate::{Error, Result};

use super::{BatchRow, Database};

const BATCH_COLUMNS: &str = "id, name, status, total_jobs, completed_jobs, failed_jobs, config, created_at, completed_at";

impl Database {
    /// Insert a new batch in `Running` state
    pub async fn insert_batch(
        &self,
        name: &str,
        total_jobs: i64,
        config: Option<&Payload>,
    ) -> Result<BatchId> {
        let now = chrono::Utc::now().timestamp();
        let config = config.map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO batches (name, status, total_jobs, completed_jobs, failed_jobs, config, created_at)
            VALUES (?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(name)
        .bind(JobStatus::Running.to_i32())
        .bind(total_jobs)
        .bind(config)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert batch: {}",
                e
            )))
        })?;

        Ok(BatchId(result.last_insert_rowid()))
    }

    /// Get a batch by ID
    pub async fn get_batch_row(&self, id: BatchId) -> Result<Option<BatchRow>> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get batch: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List batches with a specific status, oldest first
    pub async fn list_batch_rows_by_status(&self, status: JobStatus) -> Result<Vec<BatchRow>> {
        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE status = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(status.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list batches by status: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Overwrite the completed and failed counters of a batch
    pub async fn set_batch_progress(
        &self,
        id: BatchId,
        completed: i64,
        failed: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE batches SET completed_jobs = ?, failed_jobs = ? WHERE id = ?")
            .bind(completed)
            .bind(failed)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update batch progress: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Set a batch's status
    ///
    /// Terminal statuses stamp `completed_at`; moving back to `Running` clears it.
    pub async fn set_batch_status(&self, id: BatchId, status: JobStatus) -> Result<()> {
        let terminal = status.is_finished() || status == JobStatus::Partial;
        let completed_at = terminal.then(|| chrono::Utc::now().timestamp());

        sqlx::query("UPDATE batches SET status = ?, completed_at = ? WHERE id = ?")
            .bind(status.to_i32())
            .bind(completed_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update batch status: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete a batch and, via cascade, its jobs
    pub async fn delete_batch(&self, id: BatchId) -> Result<()> {
        sqlx::query("DELETE FROM batches WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete batch: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
