//! Single-item execution under a concurrency bound, a hard timeout, pacing and retries.

use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::rate_limiter::RateLimiter;
use crate::types::{Payload, Priority, ProcessingResult};

/// The processing collaborator: turns one URL into a payload
///
/// Implementations may fail with any [`Error`](crate::Error); the message becomes the
/// item's error string. Futures must tolerate being dropped mid-flight, which is how
/// timeouts and cancellation stop them.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process one URL
    async fn process(&self, url: &str) -> Result<Payload>;
}

/// [`Processor`] backed by an async closure
///
/// # Examples
///
/// ```
/// use scrape_scheduler::worker::FnProcessor;
/// use serde_json::json;
///
/// let processor = FnProcessor::new(|url: String| async move {
///     Ok::<_, scrape_scheduler::Error>(json!({ "url": url, "bytes": 1024 }))
/// });
/// # let _ = processor;
/// ```
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F> {
    /// Wrap a closure taking the URL by value
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload>> + Send,
{
    async fn process(&self, url: &str) -> Result<Payload> {
        (self.f)(url.to_string()).await
    }
}

/// Bounded-concurrency executor for single URLs
///
/// Cloning is cheap; clones share the semaphore and the rate limiter.
#[derive(Clone)]
pub struct Worker {
    processor: Arc<dyn Processor>,
    config: WorkerConfig,
    /// Hard bound on concurrent calls to the processor
    semaphore: Arc<Semaphore>,
    /// Optional pacing gate, consulted before each attempt
    rate_limiter: Option<RateLimiter>,
}

impl Worker {
    /// Create a worker with its own semaphore and rate limiter
    pub fn new(processor: Arc<dyn Processor>, config: WorkerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let rate_limiter = config.rate_limit_per_second.and_then(RateLimiter::new);
        Self {
            processor,
            config,
            semaphore,
            rate_limiter,
        }
    }

    /// Execution settings
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Permits currently free on the concurrency bound
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Process one URL with up to `retry_attempts` retries
    ///
    /// Never fails: errors, timeouts and panics from the processor all end up in a
    /// failed [`ProcessingResult`] carrying the last error message.
    pub async fn process_single(&self, url: &str, priority: Priority) -> ProcessingResult {
        let started = Instant::now();
        let max_retries = self.config.retry_attempts;
        let mut retries: u32 = 0;
        let mut last_error = String::new();

        while retries <= max_retries {
            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire().await;
            }

            let outcome = {
                let Ok(_permit) = self.semaphore.acquire().await else {
                    last_error = "worker semaphore closed".to_string();
                    break;
                };
                tokio::time::timeout(
                    self.config.timeout,
                    AssertUnwindSafe(self.processor.process(url)).catch_unwind(),
                )
                .await
            };

            match outcome {
                Ok(Ok(Ok(data))) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    tracing::debug!(url, %priority, retries, elapsed, "Item processed");
                    return ProcessingResult::success(url, data, retries).with_duration(elapsed);
                }
                Ok(Ok(Err(e))) => {
                    last_error = e.to_string();
                }
                Ok(Err(panic)) => {
                    last_error = panic_message(panic.as_ref());
                }
                Err(_) => {
                    last_error = format!(
                        "Timeout after {} seconds",
                        self.config.timeout.as_secs_f64()
                    );
                }
            }

            retries += 1;
            if retries <= max_retries {
                let delay = linear_backoff(self.config.retry_delay, retries);
                tracing::warn!(
                    url,
                    attempt = retries,
                    max_retries,
                    delay_ms = delay.as_millis(),
                    error = %last_error,
                    "Processing attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::warn!(url, %priority, error = %last_error, "Processing failed after all attempts");
        ProcessingResult::failure(url, last_error, retries.saturating_sub(1))
            .with_duration(started.elapsed().as_secs_f64())
    }

    /// Like [`process_single`](Self::process_single), but gives up as soon as `cancel` fires
    ///
    /// Returns `None` when cancelled; the in-flight processor future is dropped.
    pub async fn process_until_cancelled(
        &self,
        url: &str,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Option<ProcessingResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(url, "Processing cancelled");
                None
            }
            result = self.process_single(url, priority) => Some(result),
        }
    }
}

/// Pause before retry `attempt`, growing linearly and saturating instead of overflowing
fn linear_backoff(step: Duration, attempt: u32) -> Duration {
    step.checked_mul(attempt).unwrap_or(Duration::MAX)
}

/// Best-effort text of a panic payload
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("processor panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("processor panicked: {msg}")
    } else {
        "processor panicked".to_string()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn fast_config(retry_attempts: u32) -> WorkerConfig {
        WorkerConfig {
            max_concurrent: 4,
            timeout: Duration::from_millis(200),
            retry_attempts,
            retry_delay: Duration::from_millis(5),
            rate_limit_per_second: None,
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let processor = FnProcessor::new(|url: String| async move { Ok(json!({ "url": url })) });
        let worker = Worker::new(Arc::new(processor), fast_config(3));

        let result = worker.process_single("https://x/1", Priority::Normal).await;
        assert!(result.success);
        assert_eq!(result.retries, 0);
        assert_eq!(result.data, Some(json!({ "url": "https://x/1" })));
        assert!(result.error.is_none());
        assert!(result.duration.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_then_success_reports_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let processor = FnProcessor::new(move |_url: String| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Processing("flaky".into()))
                } else {
                    Ok(json!("ok"))
                }
            }
        });
        let worker = Worker::new(Arc::new(processor), fast_config(3));

        let result = worker.process_single("https://x/1", Priority::High).await;
        assert!(result.success);
        assert_eq!(result.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_report_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let processor = FnProcessor::new(move |_url: String| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err::<Payload, _>(Error::Processing(format!("failure {n}")))
            }
        });
        let worker = Worker::new(Arc::new(processor), fast_config(2));

        let result = worker.process_single("https://x/1", Priority::Normal).await;
        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "initial + 2 retries");
        assert_eq!(result.retries, 2);
        assert_eq!(result.error.as_deref(), Some("failure 2"));
    }

    #[tokio::test]
    async fn test_timeout_message() {
        let processor = FnProcessor::new(|_url: String| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!(null))
        });
        let mut config = fast_config(0);
        config.timeout = Duration::from_millis(50);
        let worker = Worker::new(Arc::new(processor), config);

        let result = worker.process_single("https://slow", Priority::Normal).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Timeout after 0.05 seconds"));
        assert_eq!(result.retries, 0);
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let processor = FnProcessor::new(|url: String| async move {
            if url.contains("boom") {
                panic!("parser exploded");
            }
            Ok(json!(null))
        });
        let worker = Worker::new(Arc::new(processor), fast_config(0));

        let result = worker.process_single("https://boom", Priority::Normal).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("parser exploded"), "got: {error}");
    }

    #[tokio::test]
    async fn test_semaphore_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());
        let processor = FnProcessor::new(move |_url: String| {
            let (active, peak) = (a.clone(), p.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        });
        let mut config = fast_config(0);
        config.max_concurrent = 2;
        let worker = Worker::new(Arc::new(processor), config);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let worker = worker.clone();
                tokio::spawn(async move {
                    worker
                        .process_single(&format!("https://x/{i}"), Priority::Normal)
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().success);
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {:?}", peak);
        assert_eq!(worker.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_drops_in_flight_call() {
        let processor = FnProcessor::new(|_url: String| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!(null))
        });
        let mut config = fast_config(0);
        config.timeout = Duration::from_secs(30);
        let worker = Worker::new(Arc::new(processor), config);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let result = worker
            .process_until_cancelled("https://x/1", Priority::Normal, &token)
            .await;
        assert!(result.is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(worker.available_permits(), 4, "permit released on cancel");
    }

    #[test]
    fn test_linear_backoff_saturates() {
        let step = Duration::from_millis(250);
        assert_eq!(linear_backoff(step, 1), step);
        assert_eq!(linear_backoff(step, 3), Duration::from_millis(750));
        assert_eq!(linear_backoff(Duration::MAX, 2), Duration::MAX);
        assert_eq!(
            linear_backoff(Duration::from_secs(u64::MAX / 2), u32::MAX),
            Duration::MAX
        );
    }
}
