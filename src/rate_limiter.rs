//! Call pacing for the processing collaborator
//!
//! The RateLimiter spaces calls evenly at `1 / rate` seconds apart across all tasks that
//! share it. It never admits a burst: each caller gets its own slot on a shared timeline
//! and sleeps until that slot arrives.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared pacing gate
///
/// Cloning is cheap; clones share the same timeline.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Spacing between consecutive calls
    interval: Duration,
    /// Slot handed to the most recent caller
    last_slot: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter allowing `per_second` calls per second
    ///
    /// Returns `None` for non-positive or non-finite rates, which mean "no limit".
    ///
    /// # Examples
    ///
    /// ```
    /// use scrape_scheduler::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(4.0).unwrap();
    /// assert_eq!(limiter.interval(), Duration::from_millis(250));
    ///
    /// assert!(RateLimiter::new(0.0).is_none());
    /// ```
    #[must_use]
    pub fn new(per_second: f64) -> Option<Self> {
        if !(per_second.is_finite() && per_second > 0.0) {
            return None;
        }
        let interval = Duration::try_from_secs_f64(1.0 / per_second).ok()?;
        Some(Self {
            interval,
            last_slot: Arc::new(Mutex::new(None)),
        })
    }

    /// Spacing between consecutive calls
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next pacing slot
    ///
    /// Every caller waits at least one interval; concurrent callers are spread out one
    /// interval apart in the order they asked.
    pub async fn acquire(&self) {
        let slot = {
            let mut last = self.last_slot.lock().await;
            let now = Instant::now();
            let base = match *last {
                Some(previous) if previous > now => previous,
                _ => now,
            };
            let slot = base + self.interval;
            *last = Some(slot);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}
