//! Database layer for scrape-scheduler
//!
//! Handles SQLite persistence for batches, jobs, and runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`batches`] - Batch records and progress counters
//! - [`jobs`] - Per-URL job records
//! - [`state`] - Runtime state (shutdown tracking, queue snapshots)
//!
//! [`Database`] also implements [`JobStore`](crate::persistence::JobStore) by delegating to
//! the inherent methods.

use crate::types::{Batch, BatchId, Job, JobId, JobStatus, Priority};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod batches;
mod jobs;
mod migrations;
mod state;
mod store;

/// Batch record from database
#[derive(Debug, Clone, FromRow)]
pub struct BatchRow {
    /// Unique database ID
    pub id: i64,
    /// Batch name
    pub name: String,
    /// Status code (see [`JobStatus::to_i32`])
    pub status: i32,
    /// Number of jobs registered for the batch
    pub total_jobs: i64,
    /// Jobs completed so far
    pub completed_jobs: i64,
    /// Jobs failed so far
    pub failed_jobs: i64,
    /// Batch configuration as JSON text
    pub config: Option<String>,
    /// Unix timestamp when the batch was created
    pub created_at: i64,
    /// Unix timestamp when the batch reached a terminal state
    pub completed_at: Option<i64>,
}

/// Job record from database
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    /// Unique database ID
    pub id: i64,
    /// Owning batch
    pub batch_id: i64,
    /// URL processed by the job
    pub url: String,
    /// Priority tier (1 = urgent .. 5 = deferred)
    pub priority: i32,
    /// Status code (see [`JobStatus::to_i32`])
    pub status: i32,
    /// Times the job was reset for another attempt
    pub retry_count: i64,
    /// Error from the last failed attempt
    pub error_message: Option<String>,
    /// Result payload as JSON text
    pub result: Option<String>,
    /// Unix timestamp when the job was created
    pub created_at: i64,
    /// Unix timestamp when the job last started
    pub started_at: Option<i64>,
    /// Unix timestamp when the job finished
    pub completed_at: Option<i64>,
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

impl From<BatchRow> for Batch {
    fn from(row: BatchRow) -> Self {
        Batch {
            id: BatchId(row.id),
            name: row.name,
            status: JobStatus::from_i32(row.status),
            total_jobs: row.total_jobs,
            completed_jobs: row.completed_jobs,
            failed_jobs: row.failed_jobs,
            config: row.config.and_then(|c| serde_json::from_str(&c).ok()),
            created_at: from_timestamp(row.created_at),
            completed_at: row.completed_at.map(from_timestamp),
        }
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: JobId(row.id),
            batch_id: BatchId(row.batch_id),
            url: row.url,
            priority: Priority::from_i32(row.priority),
            status: JobStatus::from_i32(row.status),
            retry_count: row.retry_count,
            error_message: row.error_message,
            result: row.result.and_then(|r| serde_json::from_str(&r).ok()),
            created_at: from_timestamp(row.created_at),
            started_at: row.started_at.map(from_timestamp),
            completed_at: row.completed_at.map(from_timestamp),
        }
    }
}

/// Database handle for scrape-scheduler
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
