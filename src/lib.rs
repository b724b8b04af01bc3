//! # scrape-scheduler
//!
//! Priority scheduling and concurrent execution core for web-scraping workloads.
//!
//! ## Pieces
//!
//! - [`QueueManager`] - a standing five-tier priority queue drained by a long-running
//!   service loop, with demote-and-requeue retries, age-based promotion, pause/resume and
//!   graceful shutdown
//! - [`BatchProcessor`] - runs a finite, named set of URLs to completion under bounded
//!   concurrency, persisting every job and checkpointing progress
//! - [`RecoveryManager`] - finds batches that stopped mid-run, analyzes their failures and
//!   re-runs what is left
//!
//! Work is done by a [`Processor`] you supply. Persistence goes through the [`JobStore`]
//! trait; [`Database`] is the bundled SQLite implementation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use scrape_scheduler::{Config, Priority, QueueManager, Worker, run_with_shutdown};
//! use scrape_scheduler::worker::FnProcessor;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let manager = QueueManager::from_config(&config);
//!     manager.add_job("https://example.com/", Priority::High, None, None).await?;
//!
//!     let processor = FnProcessor::new(|url: String| async move {
//!         Ok(serde_json::json!({ "url": url }))
//!     });
//!     let worker = Worker::new(Arc::new(processor), config.worker.clone());
//!
//!     let runner = manager.clone();
//!     tokio::spawn(async move { runner.process_with_worker(worker).await });
//!
//!     run_with_shutdown(&manager).await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Finite batch execution
pub mod batch;
/// Durable batch checkpoints
pub mod checkpoint;
/// Configuration types
pub mod config;
/// SQLite persistence layer
pub mod db;
/// Error types
pub mod error;
/// Continuous queue service (decomposed into focused submodules)
pub mod manager;
/// Persistence collaborator trait
pub mod persistence;
/// Five-tier priority queue
pub mod queue;
/// Request pacing
pub mod rate_limiter;
/// Interrupted batch detection and recovery
pub mod recovery;
/// Queue-level retry policy with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Single-URL execution
pub mod worker;

// Re-export commonly used types
pub use batch::BatchProcessor;
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use config::Config;
pub use db::Database;
pub use error::{CheckpointError, DatabaseError, Error, Result};
pub use manager::QueueManager;
pub use persistence::JobStore;
pub use queue::{PriorityQueue, QueueSnapshot};
pub use recovery::{FailureAnalysis, RecoveryManager, RecoveryPlan, RecoveryStrategy};
pub use types::{
    BatchId, BatchResults, BatchStatistics, Event, JobId, JobStatus, Priority, ProcessingResult,
    QueueStats, QueueStatus, WorkItem,
};
pub use worker::{Processor, Worker};

/// Wait for a termination signal, then shut the manager down gracefully
///
/// - **Unix:** SIGTERM or SIGINT
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`
///
/// Returns once [`QueueManager::shutdown`] has drained the in-flight items.
pub async fn run_with_shutdown(manager: &QueueManager) {
    wait_for_signal().await;
    manager.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments; fall back to ctrl_c
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "SIGINT handler unavailable, waiting for SIGTERM");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT");
            sigint.recv().await;
            tracing::info!("Received SIGINT");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "No signal handlers available, using ctrl_c");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
}
