//! Finite batch execution split into focused submodules.
//!
//! The `BatchProcessor` struct and its methods are organized by domain:
//! - [`tracking`] - Per-URL execution with persistence and checkpointing
//! - [`resume`] - Re-running the unfinished part of a stored batch
//! - [`stats`] - Counters for the current run

mod resume;
mod stats;
mod tracking;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointManager;
use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::persistence::JobStore;
use crate::types::{BatchId, BatchResults, Event, JobStatus, Priority, ProcessingResult};
use crate::worker::Worker;

/// Outcome totals of one run
#[derive(Clone, Debug, Default)]
pub(crate) struct Tally {
    pub(crate) successful: u64,
    pub(crate) failed: u64,
    /// Per-item durations in seconds
    pub(crate) durations: Vec<f64>,
}

/// Outcome counters for the run in progress, reset at the start of every batch
#[derive(Default)]
pub(crate) struct BatchCounters {
    tally: Mutex<Tally>,
    /// Held from counting an outcome until its progress is persisted, so the stored
    /// counters and checkpoints follow the order outcomes were counted in
    pub(crate) progress: tokio::sync::Mutex<()>,
}

impl BatchCounters {
    fn reset(&self) {
        *self.lock() = Tally::default();
    }

    /// Count one outcome, returning `(successful, failed)` after the update
    ///
    /// Every call sees a distinct `successful + failed` sum.
    pub(crate) fn record(&self, result: &ProcessingResult) -> (u64, u64) {
        let mut tally = self.lock();
        if let Some(duration) = result.duration {
            tally.durations.push(duration);
        }
        if result.success {
            tally.successful += 1;
        } else {
            tally.failed += 1;
        }
        (tally.successful, tally.failed)
    }

    /// Copy of the current totals
    pub(crate) fn snapshot(&self) -> Tally {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tally> {
        self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Context shared by every task of one batch run
#[derive(Clone)]
pub(crate) struct BatchRun {
    pub(crate) batch_id: BatchId,
    pub(crate) total: usize,
    pub(crate) cancel: CancellationToken,
}

/// Runs one finite, named collection of URLs to completion
///
/// Concurrency is bounded by the [`Worker`]'s semaphore. Job and batch records go to the
/// [`JobStore`]; progress is checkpointed every `checkpoint_interval` classified items when
/// a [`CheckpointManager`] is attached. Cloneable; clones share counters and cancellation,
/// so run one batch at a time per processor.
#[derive(Clone)]
pub struct BatchProcessor {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) worker: Worker,
    pub(crate) checkpoints: Option<CheckpointManager>,
    pub(crate) config: Arc<BatchConfig>,
    pub(crate) counters: Arc<BatchCounters>,
    /// Token of the current run; replaced when a batch starts
    pub(crate) cancel_token: Arc<Mutex<CancellationToken>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl BatchProcessor {
    /// Create a processor without checkpointing
    pub fn new(store: Arc<dyn JobStore>, worker: Worker, config: BatchConfig) -> Self {
        let (event_tx, _rx) = broadcast::channel(1000);
        Self {
            store,
            worker,
            checkpoints: None,
            config: Arc::new(config),
            counters: Arc::new(BatchCounters::default()),
            cancel_token: Arc::new(Mutex::new(CancellationToken::new())),
            event_tx,
        }
    }

    /// Attach a checkpoint store
    pub fn with_checkpoints(mut self, checkpoints: CheckpointManager) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// The persistence collaborator
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Subscribe to batch events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Cancel the batch in progress
    ///
    /// No further URLs are launched and in-flight ones are abandoned. Outcomes already
    /// classified stay in the result.
    pub fn cancel(&self) {
        tracing::info!("Batch cancellation requested");
        self.current_token().cancel();
    }

    /// Process `urls` under a new batch record
    ///
    /// With a `priorities` map the URLs are scheduled in ascending priority (a stable sort,
    /// so ties keep input order; missing URLs count as `Normal`). Outcomes are collected in
    /// scheduling order.
    ///
    /// When `continue_on_error` is off, the first failure in scheduling order cancels the
    /// rest, marks the batch `Failed` and returns [`Error::BatchFailed`].
    pub async fn process_batch<S>(
        &self,
        name: &str,
        urls: &[S],
        priorities: Option<&HashMap<String, Priority>>,
    ) -> Result<BatchResults>
    where
        S: AsRef<str>,
    {
        if urls.is_empty() {
            return Ok(BatchResults::empty());
        }

        let started = Instant::now();
        let total = urls.len();
        let batch_config = serde_json::to_value(&*self.config).ok();
        let batch_id = self
            .store
            .create_batch(name, total as i64, batch_config.as_ref())
            .await?;

        self.counters.reset();
        let cancel = self.fresh_token();
        let run = BatchRun {
            batch_id,
            total,
            cancel: cancel.clone(),
        };

        let mut ordered: Vec<(String, Priority)> = urls
            .iter()
            .map(|url| {
                let url = url.as_ref().to_string();
                let priority = priorities
                    .and_then(|map| map.get(&url).copied())
                    .unwrap_or_default();
                (url, priority)
            })
            .collect();
        if priorities.is_some() {
            ordered.sort_by_key(|(_, priority)| *priority);
        }

        tracing::info!(batch_id = %batch_id, name, total, "Batch started");
        self.emit_event(Event::BatchStarted {
            batch_id,
            name: name.to_string(),
            total,
        });

        // Launch in scheduling order, at most `max_concurrent` tasks at a time
        let launch_limit = Arc::new(Semaphore::new(self.worker.config().max_concurrent.max(1)));
        let stop_on_failure = !self.config.continue_on_error;
        let mut handles = Vec::with_capacity(total);
        for (url, priority) in ordered {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(batch_id = %batch_id, "Batch cancelled, not launching further URLs");
                    break;
                }
                permit = launch_limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let processor = self.clone();
            let run = run.clone();
            let task_url = url.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let outcome = processor
                    .process_with_tracking(&task_url, priority, &run)
                    .await;
                let failed = match &outcome {
                    Ok(Some(result)) => !result.success,
                    Ok(None) => false,
                    Err(_) => true,
                };
                if failed && stop_on_failure {
                    run.cancel.cancel();
                }
                outcome
            });
            handles.push((url, handle));
        }

        let mut results = BatchResults {
            total,
            ..BatchResults::default()
        };
        let mut handles = handles.into_iter();
        while let Some((url, handle)) = handles.next() {
            let outcome = match handle.await {
                Ok(Ok(Some(result))) => result,
                // Cancelled before an outcome was reached
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => {
                    tracing::warn!(batch_id = %batch_id, url = %url, error = %e, "Item tracking failed");
                    ProcessingResult::failure(url.clone(), e.to_string(), 0)
                }
                Err(e) => {
                    tracing::warn!(batch_id = %batch_id, url = %url, error = %e, "Item task panicked");
                    ProcessingResult::failure(url.clone(), e.to_string(), 0)
                }
            };

            if outcome.success {
                results.successful.push(url);
                continue;
            }

            if stop_on_failure {
                let message = outcome.error.unwrap_or_default();
                cancel.cancel();
                for (_, rest) in handles.by_ref() {
                    let _ = rest.await;
                }
                results.failed.push(url.clone());
                self.finish(batch_id, &results, JobStatus::Failed).await;
                tracing::error!(batch_id = %batch_id, url = %url, error = %message, "Batch aborted on item failure");
                return Err(Error::BatchFailed {
                    batch_id,
                    url,
                    message,
                });
            }
            results.failed.push(url);
        }

        let status = if cancel.is_cancelled() {
            JobStatus::Cancelled
        } else if results.failed.is_empty() {
            JobStatus::Completed
        } else if results.successful.is_empty() {
            JobStatus::Failed
        } else {
            JobStatus::Partial
        };

        results.duration = Some(started.elapsed().as_secs_f64());
        results.statistics = Some(self.get_statistics());
        self.finish(batch_id, &results, status).await;

        tracing::info!(
            batch_id = %batch_id,
            successful = results.successful.len(),
            failed = results.failed.len(),
            status = ?status,
            "Batch finished"
        );
        Ok(results)
    }

    /// Persist the final status and announce it; persistence errors are only logged
    async fn finish(&self, batch_id: BatchId, results: &BatchResults, status: JobStatus) {
        if let Err(e) = self.store.update_batch_status(batch_id, status).await {
            tracing::warn!(batch_id = %batch_id, error = %e, "Failed to persist final batch status");
        }
        self.emit_event(Event::BatchFinished {
            batch_id,
            successful: results.successful.len(),
            failed: results.failed.len(),
            status,
        });
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self
            .cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    /// Emit an event to all subscribers; dropped silently when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
