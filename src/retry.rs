//! Queue-level retry decisions with exponential backoff
//!
//! [`RetryPolicy`] only computes decisions; the [`QueueManager`](crate::manager::QueueManager)
//! acts on them. Per-attempt retries inside a single processing round are handled by the
//! [`Worker`](crate::worker::Worker) with its own linear backoff.
//!
//! # Example
//!
//! ```
//! use scrape_scheduler::config::RetryConfig;
//! use scrape_scheduler::retry::RetryPolicy;
//! use scrape_scheduler::types::{Priority, WorkItem};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(RetryConfig::default());
//! let item = WorkItem::new("https://example.com", Priority::Normal);
//!
//! assert!(policy.should_retry(&item));
//! assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
//!
//! let demoted = policy.demote(&item);
//! assert_eq!(demoted.retry_count, 1);
//! assert_eq!(demoted.priority, Priority::Low);
//! ```

use crate::config::RetryConfig;
use crate::types::WorkItem;
use rand::Rng;
use std::time::Duration;

/// Largest exponent applied before the multiplication would overflow any sane delay
const MAX_EXPONENT: u32 = 32;

/// Stateless retry decisions for failed work items
#[derive(Clone, Debug, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from its configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Requeues allowed per item
    pub fn max_retries_per_item(&self) -> u32 {
        self.config.max_retries_per_item
    }

    /// True iff the item has retries left
    pub fn should_retry(&self, item: &WorkItem) -> bool {
        item.retry_count < self.config.max_retries_per_item
    }

    /// `base_delay * 2^retry_count`, jittered when enabled
    ///
    /// `max_delay` is a hard ceiling on the returned delay, jitter included.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.min(MAX_EXPONENT));
        let delay = self
            .config
            .base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX);

        let delay = if self.config.jitter {
            add_jitter(delay)
        } else {
            delay
        };

        match self.config.max_delay {
            Some(ceiling) => delay.min(ceiling),
            None => delay,
        }
    }

    /// Copy of the item with one more retry recorded and one tier less urgent
    pub fn demote(&self, item: &WorkItem) -> WorkItem {
        let mut demoted = item.clone();
        demoted.retry_count = item.retry_count.saturating_add(1);
        demoted.priority = item.priority.demoted();
        demoted
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(Duration::MAX)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn policy(max_retries: u32, max_delay: Option<Duration>, jitter: bool) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries_per_item: max_retries,
            base_delay: Duration::from_secs(1),
            max_delay,
            jitter,
        })
    }

    #[test]
    fn test_should_retry_until_ceiling() {
        let policy = policy(2, None, false);
        let mut item = WorkItem::new("https://x/1", Priority::Normal);

        assert!(policy.should_retry(&item));
        item.retry_count = 1;
        assert!(policy.should_retry(&item));
        item.retry_count = 2;
        assert!(!policy.should_retry(&item), "ceiling reached");
    }

    #[test]
    fn test_zero_retries_never_retries() {
        let policy = policy(0, None, false);
        let item = WorkItem::new("https://x/1", Priority::Normal);
        assert!(!policy.should_retry(&item));
    }

    #[test]
    fn test_exponential_backoff_uncapped() {
        let policy = policy(3, None, false);
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(1024));
    }

    #[test]
    fn test_backoff_respects_ceiling() {
        let policy = policy(3, Some(Duration::from_secs(30)), false);
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(16));
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(500), Duration::from_secs(30));
    }

    #[test]
    fn test_huge_retry_count_does_not_overflow() {
        let policy = policy(3, None, false);
        assert!(policy.backoff_delay(u32::MAX) >= Duration::from_secs(1 << 31));
    }

    #[test]
    fn test_jitter_stays_within_double() {
        let policy = policy(3, None, true);
        for _ in 0..50 {
            let delay = policy.backoff_delay(2);
            assert!(delay >= Duration::from_secs(4), "got {delay:?}");
            assert!(delay <= Duration::from_secs(8), "got {delay:?}");
        }
    }

    #[test]
    fn test_jittered_delay_never_exceeds_ceiling() {
        let ceiling = Duration::from_secs(10);
        let policy = policy(3, Some(ceiling), true);
        for _ in 0..50 {
            // 8s before jitter, so up to 16s without the ceiling
            let delay = policy.backoff_delay(3);
            assert!(delay >= Duration::from_secs(8), "got {delay:?}");
            assert!(delay <= ceiling, "got {delay:?}");
            assert_eq!(policy.backoff_delay(20), ceiling);
        }
    }

    #[test]
    fn test_demote_increments_and_lowers_tier() {
        let policy = RetryPolicy::default();
        let item = WorkItem::new("https://x/1", Priority::High);

        let once = policy.demote(&item);
        assert_eq!(once.retry_count, 1);
        assert_eq!(once.priority, Priority::Normal);
        assert_eq!(once.url, item.url);
        assert_eq!(item.retry_count, 0, "original is untouched");
    }

    #[test]
    fn test_demote_clamps_at_lowest_tier() {
        let policy = RetryPolicy::default();
        let item = WorkItem::new("https://x/1", Priority::Deferred);
        let demoted = policy.demote(&item);
        assert_eq!(demoted.priority, Priority::Deferred);
        assert_eq!(demoted.retry_count, 1);
    }
}
