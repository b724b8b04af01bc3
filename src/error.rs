//! Error types for scrape-scheduler
//!
//! Per-item failures never surface here: the worker converts them into a failed
//! [`ProcessingResult`](crate::types::ProcessingResult). The variants below cover the cases
//! that do interrupt a call:
//! - aggregate batch failure when `continue_on_error` is off
//! - lookups of batches that do not exist
//! - checkpoint writes that could not be completed
//! - persistence and configuration problems

use std::path::PathBuf;
use thiserror::Error;

use crate::types::BatchId;

/// Result type alias for scrape-scheduler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for scrape-scheduler
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "worker.max_concurrent")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Checkpoint could not be written
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A batch running with `continue_on_error = false` hit a failed item
    #[error("batch {batch_id} aborted: {url} failed: {message}")]
    BatchFailed {
        /// Batch that was aborted
        batch_id: BatchId,
        /// URL of the item whose failure aborted the batch
        url: String,
        /// Error message of the triggering failure
        message: String,
    },

    /// Requested batch (or other record) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// Error raised by a processing collaborator
    #[error("{0}")]
    Processing(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Checkpoint write failures
///
/// Read failures never produce these: a missing or corrupt checkpoint is reported
/// as "no checkpoint" instead.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// State could not be serialized
    #[error("failed to serialize checkpoint for batch {batch_id}: {reason}")]
    Serialize {
        /// Batch the checkpoint belongs to
        batch_id: BatchId,
        /// Underlying serializer message
        reason: String,
    },

    /// Temp file could not be written or renamed into place
    #[error("failed to write checkpoint for batch {batch_id} to {path}: {reason}")]
    Write {
        /// Batch the checkpoint belongs to
        batch_id: BatchId,
        /// Destination path of the checkpoint
        path: PathBuf,
        /// Underlying I/O message
        reason: String,
    },

    /// Checkpoint directory could not be prepared or scanned
    #[error("checkpoint directory {path}: {reason}")]
    Directory {
        /// Checkpoint directory
        path: PathBuf,
        /// Underlying I/O message
        reason: String,
    },
}

impl Error {
    /// Construct a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}
