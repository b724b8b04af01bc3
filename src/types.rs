//! Core types for scrape-scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Opaque payload returned by a processing collaborator
pub type Payload = serde_json::Value;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

record_id!(
    /// Unique identifier for a persisted batch
    BatchId
);

record_id!(
    /// Unique identifier for a persisted job
    JobId
);

/// Scheduling tier of a work item
///
/// Lower numeric value means more urgent. The derived ordering follows the numeric
/// value, so `Priority::Urgent < Priority::Deferred`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Tier 1
    Urgent = 1,
    /// Tier 2
    High = 2,
    /// Tier 3
    #[default]
    Normal = 3,
    /// Tier 4
    Low = 4,
    /// Tier 5
    Deferred = 5,
}

impl Priority {
    /// All tiers, most urgent first
    pub const ALL: [Priority; 5] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Deferred,
    ];

    /// The least urgent tier; demotion never goes past it
    pub const LOWEST: Priority = Priority::Deferred;

    /// Convert integer priority code to Priority enum
    pub fn from_i32(priority: i32) -> Self {
        match priority {
            1 => Priority::Urgent,
            2 => Priority::High,
            3 => Priority::Normal,
            4 => Priority::Low,
            5 => Priority::Deferred,
            p if p < 1 => Priority::Urgent,
            _ => Priority::Deferred,
        }
    }

    /// Convert Priority enum to integer priority code
    pub fn to_i32(self) -> i32 {
        self as i32
    }

    /// Zero-based tier index (Urgent = 0)
    pub fn index(self) -> usize {
        (self as usize) - 1
    }

    /// Next less urgent tier, clamped at [`Priority::LOWEST`]
    pub fn demoted(self) -> Self {
        Self::from_i32((self.to_i32() + 1).min(Self::LOWEST.to_i32()))
    }

    /// Next more urgent tier, clamped at [`Priority::Urgent`]
    pub fn promoted(self) -> Self {
        Self::from_i32((self.to_i32() - 1).max(Priority::Urgent.to_i32()))
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Deferred => "deferred",
        };
        f.write_str(name)
    }
}

/// Status of a persisted job or batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to run
    Pending,
    /// Currently running
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Deliberately not run
    Skipped,
    /// Cancelled before completion
    Cancelled,
    /// Batch finished with a mix of successes and failures
    Partial,
}

impl JobStatus {
    /// Convert integer status code to JobStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => JobStatus::Pending,
            1 => JobStatus::Running,
            2 => JobStatus::Completed,
            3 => JobStatus::Failed,
            4 => JobStatus::Skipped,
            5 => JobStatus::Cancelled,
            6 => JobStatus::Partial,
            _ => JobStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert JobStatus enum to integer status code
    pub fn to_i32(self) -> i32 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Completed => 2,
            JobStatus::Failed => 3,
            JobStatus::Skipped => 4,
            JobStatus::Cancelled => 5,
            JobStatus::Partial => 6,
        }
    }

    /// Whether the status ends a job's lifecycle
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }
}

/// Lifecycle state of a [`QueueManager`](crate::manager::QueueManager)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Constructed, not yet serving
    #[default]
    Idle,
    /// Service loop is pulling work
    Processing,
    /// Service loop is suspended, queue contents kept
    Paused,
    /// Terminal
    Stopped,
}

/// A unit of schedulable work
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// URL to process
    pub url: String,
    /// Current tier
    pub priority: Priority,
    /// When the item was admitted
    pub enqueued_at: DateTime<Utc>,
    /// Owning batch, if any
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    /// Caller-supplied annotations
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Failed processing rounds so far
    #[serde(default)]
    pub retry_count: u32,
    /// Admission sequence number, breaks ties between equal timestamps
    #[serde(default)]
    pub sequence: u64,
}

impl WorkItem {
    /// Create a fresh item enqueued now
    pub fn new(url: impl Into<String>, priority: Priority) -> Self {
        Self {
            url: url.into(),
            priority,
            enqueued_at: Utc::now(),
            batch_id: None,
            metadata: HashMap::new(),
            retry_count: 0,
            sequence: 0,
        }
    }

    /// Attach the owning batch
    pub fn with_batch(mut self, batch_id: Option<BatchId>) -> Self {
        self.batch_id = batch_id;
        self
    }

    /// Attach caller metadata
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of processing one URL
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Whether processing succeeded
    pub success: bool,
    /// URL that was processed
    pub url: String,
    /// Payload returned by the processing collaborator
    pub data: Option<Payload>,
    /// Last error message when processing failed
    pub error: Option<String>,
    /// Retries used (attempts beyond the first)
    pub retries: u32,
    /// Wall-clock seconds spent
    pub duration: Option<f64>,
}

impl ProcessingResult {
    /// Successful outcome
    pub fn success(url: impl Into<String>, data: Payload, retries: u32) -> Self {
        Self {
            success: true,
            url: url.into(),
            data: Some(data),
            error: None,
            retries,
            duration: None,
        }
    }

    /// Failed outcome
    pub fn failure(url: impl Into<String>, error: impl Into<String>, retries: u32) -> Self {
        Self {
            success: false,
            url: url.into(),
            data: None,
            error: Some(error.into()),
            retries,
            duration: None,
        }
    }

    /// Record elapsed time
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }
}

/// Aggregate outcome of a finite batch run
///
/// `successful.len() + failed.len() <= total`; the sum falls short when the batch was
/// cancelled before every item was classified.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResults {
    /// Successfully processed URLs, in scheduling order
    pub successful: Vec<String>,
    /// URLs that failed, in scheduling order
    pub failed: Vec<String>,
    /// Items in scope for this batch
    pub total: usize,
    /// Wall-clock seconds for the run
    pub duration: Option<f64>,
    /// Aggregates computed at the end of the run
    pub statistics: Option<BatchStatistics>,
}

impl BatchResults {
    /// Result for a batch that had nothing to do
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of classified items
    pub fn classified(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

/// Persisted batch record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Batch ID
    pub id: BatchId,
    /// Batch name
    pub name: String,
    /// Current status
    pub status: JobStatus,
    /// Number of jobs registered for the batch
    pub total_jobs: i64,
    /// Jobs completed so far
    pub completed_jobs: i64,
    /// Jobs failed so far
    pub failed_jobs: i64,
    /// Configuration the batch was started with
    pub config: Option<serde_json::Value>,
    /// When the batch was created
    pub created_at: DateTime<Utc>,
    /// When the batch finished
    pub completed_at: Option<DateTime<Utc>>,
}

/// Persisted job record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job ID
    pub id: JobId,
    /// Owning batch
    pub batch_id: BatchId,
    /// URL processed by the job
    pub url: String,
    /// Scheduling tier
    pub priority: Priority,
    /// Current status
    pub status: JobStatus,
    /// Times this job was reset for another attempt
    pub retry_count: i64,
    /// Error from the last failed attempt
    pub error_message: Option<String>,
    /// Payload from a successful attempt
    pub result: Option<Payload>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job last started running
    pub started_at: Option<DateTime<Utc>>,
    /// When the job finished
    pub completed_at: Option<DateTime<Utc>>,
}

/// `processed / (processed + failed) * 100`, or `0` when nothing has been processed
pub fn success_rate(processed: u64, failed: u64) -> f64 {
    let total = processed + failed;
    if total == 0 {
        0.0
    } else {
        processed as f64 / total as f64 * 100.0
    }
}

/// Snapshot of [`QueueManager`](crate::manager::QueueManager) counters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Lifecycle state
    pub status: QueueStatus,
    /// Items waiting in each tier
    pub tier_sizes: BTreeMap<Priority, usize>,
    /// Items waiting across all tiers
    pub total_size: usize,
    /// Items currently being processed
    pub in_flight: usize,
    /// Successful completions
    pub total_processed: u64,
    /// Failed processing rounds (including ones that were requeued)
    pub total_failed: u64,
    /// URLs that exhausted their retries
    pub failed_items: usize,
    /// See [`success_rate`]
    pub success_rate: f64,
}

/// Aggregates for a [`BatchProcessor`](crate::batch::BatchProcessor) run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    /// Items classified so far
    pub total_processed: u64,
    /// Successful items
    pub successful: u64,
    /// Failed items
    pub failed: u64,
    /// See [`success_rate`]
    pub success_rate: f64,
    /// Sum of per-item durations in seconds
    pub total_duration: f64,
    /// Mean per-item duration in seconds
    pub average_duration: Option<f64>,
    /// Fastest item in seconds
    pub min_duration: Option<f64>,
    /// Slowest item in seconds
    pub max_duration: Option<f64>,
}

/// Event emitted while queues and batches make progress
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A batch was registered and started
    BatchStarted {
        /// Batch ID
        batch_id: BatchId,
        /// Batch name
        name: String,
        /// Items in the batch
        total: usize,
    },

    /// An item finished successfully
    ItemCompleted {
        /// URL processed
        url: String,
        /// Owning batch, if any
        batch_id: Option<BatchId>,
        /// Seconds spent
        duration: f64,
    },

    /// An item finished with an error
    ItemFailed {
        /// URL processed
        url: String,
        /// Owning batch, if any
        batch_id: Option<BatchId>,
        /// Last error message
        error: String,
        /// Retries used
        retries: u32,
    },

    /// A failed item was demoted and admitted again
    ItemRequeued {
        /// URL requeued
        url: String,
        /// New tier
        priority: Priority,
        /// Queue-level retries so far
        retry_count: u32,
    },

    /// A failed item exhausted its retries
    ItemAbandoned {
        /// URL abandoned
        url: String,
        /// Final retry count
        retry_count: u32,
    },

    /// A progress checkpoint was written
    CheckpointCreated {
        /// Batch ID
        batch_id: BatchId,
        /// Completed items at checkpoint time
        completed: u64,
        /// Failed items at checkpoint time
        failed: u64,
    },

    /// A batch finished (or was aborted)
    BatchFinished {
        /// Batch ID
        batch_id: BatchId,
        /// Successful items
        successful: usize,
        /// Failed items
        failed: usize,
        /// Final persisted status
        status: JobStatus,
    },

    /// Queue service loop paused
    QueuePaused,

    /// Queue service loop resumed
    QueueResumed,

    /// Queue manager shut down
    Shutdown,
}
