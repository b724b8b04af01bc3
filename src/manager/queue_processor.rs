//! Service loop: drains the priority queue and spawns one task per item.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::types::{Event, Priority, ProcessingResult, QueueStatus, WorkItem};
use crate::worker::Worker;

use super::QueueManager;

impl QueueManager {
    /// Run the service loop until shutdown
    ///
    /// Takes items in priority order and calls `processor_fn(url, priority)` for each, with
    /// at most `max_concurrent` calls in flight. When the queue is empty the loop sleeps
    /// until an item is admitted or shutdown begins. A periodic rebalance sweep promotes
    /// items that waited too long.
    ///
    /// A panicking `processor_fn` only fails its own item. Fails with
    /// [`Error::ShuttingDown`] if the manager is already stopped.
    pub async fn process_queue<F, Fut>(&self, processor_fn: F) -> Result<()>
    where
        F: Fn(String, Priority) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcessingResult> + Send + 'static,
    {
        let started = self.status_tx.send_if_modified(|status| match status {
            QueueStatus::Idle => {
                *status = QueueStatus::Processing;
                true
            }
            _ => false,
        });
        if *self.status_tx.borrow() == QueueStatus::Stopped || self.shutdown_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        if started {
            tracing::info!("Queue processing started");
        }

        let processor_fn = Arc::new(processor_fn);
        let mut status_rx = self.status_tx.subscribe();
        let rebalance_interval = self.config.rebalance.interval;
        let mut next_rebalance = Instant::now() + rebalance_interval;

        loop {
            if self.shutdown_token.is_cancelled() {
                break;
            }

            if Instant::now() >= next_rebalance {
                self.rebalance().await;
                next_rebalance = Instant::now() + rebalance_interval;
            }

            // Paused: hold here without touching the queue
            if *status_rx.borrow_and_update() == QueueStatus::Paused {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => break,
                    changed = status_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            // A permit first, so the item taken next is the most urgent one at that moment
            let permit = tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                permit = self.queue_state.concurrent_limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let notified = self.queue_state.work_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let item = {
                let mut queue = self.queue_state.queue.lock().await;
                // Checked under the lock so shutdown's drain check sees every item we take
                if self.shutdown_token.is_cancelled()
                    || *self.status_tx.borrow() == QueueStatus::Paused
                {
                    None
                } else {
                    queue.next()
                }
            };

            match item {
                Some(item) => {
                    let manager = self.clone();
                    let processor_fn = Arc::clone(&processor_fn);
                    tokio::spawn(async move {
                        let _permit = permit;
                        let url = item.url.clone();
                        let priority = item.priority;

                        tracing::debug!(url = %url, %priority, "Processing item");
                        let result = AssertUnwindSafe(async { processor_fn(url.clone(), priority).await })
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                tracing::error!(url = %url, "Processor panicked");
                                ProcessingResult::failure(url.clone(), "processor panicked", 0)
                            });

                        manager.mark_completed(item, result).await;
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = self.shutdown_token.cancelled() => break,
                        _ = &mut notified => {}
                        _ = status_rx.changed() => {}
                        _ = tokio::time::sleep_until(next_rebalance) => {}
                    }
                }
            }
        }

        tracing::info!("Queue processing loop exited");
        Ok(())
    }

    /// Run the service loop with a [`Worker`] as the processor
    pub async fn process_with_worker(&self, worker: Worker) -> Result<()> {
        self.process_queue(move |url, priority| {
            let worker = worker.clone();
            async move { worker.process_single(&url, priority).await }
        })
        .await
    }

    /// Record the outcome of an in-flight item
    ///
    /// Success clears any failure record for the URL. A failure is either demoted and
    /// re-admitted after the retry backoff, or, once retries are exhausted, recorded in
    /// `failed_items`.
    pub async fn mark_completed(&self, item: WorkItem, result: ProcessingResult) {
        let mut requeue = None;
        let drained = {
            let mut queue = self.queue_state.queue.lock().await;

            if result.success {
                queue.record_success(&item);
                self.emit_event(Event::ItemCompleted {
                    url: item.url.clone(),
                    batch_id: item.batch_id,
                    duration: result.duration.unwrap_or_default(),
                });
            } else {
                queue.record_failure(&item);
                let error = result.error.clone().unwrap_or_default();
                self.emit_event(Event::ItemFailed {
                    url: item.url.clone(),
                    batch_id: item.batch_id,
                    error: error.clone(),
                    retries: result.retries,
                });

                if self.retry_policy.should_retry(&item) {
                    let mut retry = self.retry_policy.demote(&item);
                    retry.enqueued_at = chrono::Utc::now();
                    tracing::warn!(
                        url = %item.url,
                        retry_count = retry.retry_count,
                        priority = %retry.priority,
                        error = %error,
                        "Item failed, scheduling retry"
                    );
                    self.queue_state
                        .pending_requeues
                        .fetch_add(1, Ordering::SeqCst);
                    requeue = Some(retry);
                } else {
                    tracing::warn!(
                        url = %item.url,
                        retry_count = item.retry_count,
                        error = %error,
                        "Item failed, retries exhausted"
                    );
                    queue.record_abandoned(&item.url, item.retry_count);
                    self.emit_event(Event::ItemAbandoned {
                        url: item.url.clone(),
                        retry_count: item.retry_count,
                    });
                }
            }

            self.is_drained(&queue)
        };

        if drained {
            self.queue_state.drained.notify_waiters();
        }

        if let Some(retry) = requeue {
            self.schedule_requeue(retry);
        }
    }

    /// Re-admit a demoted item once its backoff has elapsed
    ///
    /// Shutdown cuts the wait short and puts the item straight back so a snapshot taken
    /// afterwards still contains it.
    fn schedule_requeue(&self, item: WorkItem) {
        let delay = self.retry_policy.backoff_delay(item.retry_count);
        let manager = self.clone();

        tokio::spawn(async move {
            let interrupted = tokio::select! {
                _ = manager.shutdown_token.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };

            let url = item.url.clone();
            let priority = item.priority;
            let retry_count = item.retry_count;

            let (accepted, drained) = {
                let mut queue = manager.queue_state.queue.lock().await;
                let accepted = queue.push(item);
                if !accepted {
                    queue.record_abandoned(&url, retry_count);
                }
                manager
                    .queue_state
                    .pending_requeues
                    .fetch_sub(1, Ordering::SeqCst);
                (accepted, manager.is_drained(&queue))
            };
            if drained {
                manager.queue_state.drained.notify_waiters();
            }

            if accepted {
                tracing::debug!(url = %url, %priority, retry_count, "Item requeued");
                manager.emit_event(Event::ItemRequeued {
                    url,
                    priority,
                    retry_count,
                });
                if !interrupted {
                    manager.queue_state.work_available.notify_one();
                }
            } else {
                tracing::warn!(url = %url, "Queue full, dropping retry");
                manager.emit_event(Event::ItemAbandoned { url, retry_count });
            }
        });
    }
}
