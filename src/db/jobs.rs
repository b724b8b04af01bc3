//! Per-URL job records.

use crate::error::DatabaseError;
use crate::types::{BatchId, JobId, JobStatus, Payload, Priority};
use crate::{Error, Result};

use super::{Database, JobRow};

const JOB_COLUMNS: &str = "id, batch_id, url, priority, status, retry_count, error_message, result, created_at, started_at, completed_at";

impl Database {
    /// Insert a new job in `Pending` state
    pub async fn insert_job(
        &self,
        url: &str,
        batch_id: BatchId,
        priority: Priority,
    ) -> Result<JobId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (batch_id, url, priority, status, retry_count, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(batch_id)
        .bind(url)
        .bind(priority.to_i32())
        .bind(JobStatus::Pending.to_i32())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert job: {}",
                e
            )))
        })?;

        Ok(JobId(result.last_insert_rowid()))
    }

    /// Get a job by ID
    pub async fn get_job_row(&self, id: JobId) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get job: {}",
                    e
                )))
            })?;

        Ok(row)
    }

    /// All jobs of a batch in creation order
    pub async fn list_job_rows(&self, batch_id: BatchId) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE batch_id = ? ORDER BY id ASC"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list jobs: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Count a batch's jobs in a given status
    pub async fn count_jobs_by_status(&self, batch_id: BatchId, status: JobStatus) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE batch_id = ? AND status = ?")
                .bind(batch_id)
                .bind(status.to_i32())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count jobs: {}",
                        e
                    )))
                })?;

        Ok(count)
    }

    /// Move a job to a new status
    ///
    /// `Running` stamps `started_at`; finished statuses stamp `completed_at`. The error
    /// message and result are overwritten with the given values.
    pub async fn set_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&Payload>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = result.map(serde_json::to_string).transpose()?;
        let started_at = (status == JobStatus::Running).then_some(now);
        let completed_at = status.is_finished().then_some(now);

        let query = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, error_message = ?, result = ?,
                started_at = COALESCE(?, started_at), completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.to_i32())
        .bind(error)
        .bind(result)
        .bind(started_at)
        .bind(completed_at)
        .bind(id);

        query.execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update job status: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Put a job back to `Pending`, clearing its error and bumping its retry count
    pub async fn reset_job_to_pending(&self, id: JobId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, error_message = NULL, retry_count = retry_count + 1,
                started_at = NULL, completed_at = NULL
            WHERE id = ?
            "#,
        )
        .bind(JobStatus::Pending.to_i32())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset job: {}",
                e
            )))
        })?;

        Ok(())
    }
}
