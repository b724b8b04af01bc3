//! Configuration types for scrape-scheduler
//!
//! Parsing configuration files is left to the embedding application; every struct here
//! is `Deserialize` with per-field defaults, so any serde format works and an empty
//! document yields [`Config::default`].

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Main configuration for the scheduling core
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Standing-queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Queue-level retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-item execution settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Finite batch settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Checkpoint storage
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Database storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Check the settings that would otherwise deadlock or divide by zero at runtime
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_queue_size == 0 {
            return Err(Error::config(
                "queue.max_queue_size",
                "max_queue_size must be at least 1",
            ));
        }
        if self.queue.max_concurrent == 0 {
            return Err(Error::config(
                "queue.max_concurrent",
                "max_concurrent must be at least 1",
            ));
        }
        if self.queue.rebalance.interval.is_zero() {
            return Err(Error::config(
                "queue.rebalance.interval",
                "rebalance interval must be positive",
            ));
        }
        if self.worker.max_concurrent == 0 {
            return Err(Error::config(
                "worker.max_concurrent",
                "max_concurrent must be at least 1",
            ));
        }
        if self.worker.timeout.is_zero() {
            return Err(Error::config("worker.timeout", "timeout must be positive"));
        }
        if let Some(rate) = self.worker.rate_limit_per_second
            && !(rate.is_finite() && rate > 0.0)
        {
            return Err(Error::config(
                "worker.rate_limit_per_second",
                format!("rate limit must be a positive number, got {rate}"),
            ));
        }
        if self.batch.checkpoint_interval == 0 {
            return Err(Error::config(
                "batch.checkpoint_interval",
                "checkpoint_interval must be at least 1",
            ));
        }
        if let Some(max_delay) = self.retry.max_delay
            && max_delay < self.retry.base_delay
        {
            return Err(Error::config(
                "retry.max_delay",
                "max_delay must not be shorter than base_delay",
            ));
        }
        Ok(())
    }
}

/// Standing-queue settings used by [`QueueManager`](crate::manager::QueueManager)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum items waiting across all tiers (default: 10000)
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Maximum items processed at once by the service loop (default: 5)
    #[serde(default = "default_queue_concurrency")]
    pub max_concurrent: usize,

    /// Age-based promotion thresholds
    #[serde(default)]
    pub rebalance: RebalanceConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_concurrent: default_queue_concurrency(),
            rebalance: RebalanceConfig::default(),
        }
    }
}

/// Age thresholds after which waiting items move up one tier
///
/// A threshold of `None` disables promotion out of that tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Normal -> High (default: 1 hour)
    #[serde(default = "default_normal_to_high", with = "optional_duration_serde")]
    pub normal_to_high: Option<Duration>,

    /// Low -> Normal (default: 2 hours)
    #[serde(default = "default_low_to_normal", with = "optional_duration_serde")]
    pub low_to_normal: Option<Duration>,

    /// Deferred -> Low (default: 4 hours)
    #[serde(default = "default_deferred_to_low", with = "optional_duration_serde")]
    pub deferred_to_low: Option<Duration>,

    /// How often the service loop runs a rebalance sweep (default: 5 minutes)
    #[serde(default = "default_rebalance_interval", with = "duration_serde")]
    pub interval: Duration,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            normal_to_high: default_normal_to_high(),
            low_to_normal: default_low_to_normal(),
            deferred_to_low: default_deferred_to_low(),
            interval: default_rebalance_interval(),
        }
    }
}

/// Queue-level retry policy for failed items
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Requeues allowed per item before it is abandoned (default: 3)
    #[serde(default = "default_max_retries_per_item")]
    pub max_retries_per_item: u32,

    /// Base of the exponential backoff, `base * 2^retry_count` (default: 1 second)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Ceiling on a single backoff (default: 300 seconds, None = uncapped)
    #[serde(default = "default_max_delay", with = "optional_duration_serde")]
    pub max_delay: Option<Duration>,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries_per_item: default_max_retries_per_item(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

/// Per-item execution settings used by [`Worker`](crate::worker::Worker)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum concurrent calls to the processing collaborator (default: 10)
    #[serde(default = "default_worker_concurrency")]
    pub max_concurrent: usize,

    /// Hard deadline per attempt (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Retries after the first attempt (default: 3)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Linear backoff unit between attempts (default: 1 second)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Pace calls to at most this many per second (None = unlimited)
    #[serde(default)]
    pub rate_limit_per_second: Option<f64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_worker_concurrency(),
            timeout: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            rate_limit_per_second: None,
        }
    }
}

/// Finite batch settings used by [`BatchProcessor`](crate::batch::BatchProcessor)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Keep going after a failed item (default: true)
    #[serde(default = "default_true")]
    pub continue_on_error: bool,

    /// Write a checkpoint every N classified items (default: 10)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

/// Checkpoint storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding checkpoint files (default: "checkpoints")
    #[serde(default = "default_checkpoint_dir")]
    pub directory: PathBuf,

    /// Age after which checkpoints are garbage-collected (default: 7 days)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            directory: default_checkpoint_dir(),
            retention_days: default_retention_days(),
        }
    }
}

/// Database storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "scrape-scheduler.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_max_queue_size() -> usize {
    10_000
}

fn default_queue_concurrency() -> usize {
    5
}

fn default_normal_to_high() -> Option<Duration> {
    Some(Duration::from_secs(60 * 60))
}

fn default_low_to_normal() -> Option<Duration> {
    Some(Duration::from_secs(2 * 60 * 60))
}

fn default_deferred_to_low() -> Option<Duration> {
    Some(Duration::from_secs(4 * 60 * 60))
}

fn default_rebalance_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_retries_per_item() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Option<Duration> {
    Some(Duration::from_secs(300))
}

fn default_worker_concurrency() -> usize {
    10
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_true() -> bool {
    true
}

fn default_checkpoint_interval() -> u64 {
    10
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_retention_days() -> u32 {
    7
}

fn default_database_path() -> PathBuf {
    PathBuf::from("scrape-scheduler.db")
}

// Duration serialization helper (fractional seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<f64> = Option::deserialize(deserializer)?;
        secs.map(|s| Duration::try_from_secs_f64(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
