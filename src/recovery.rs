//! Detection and recovery of batches that stopped before finishing
//!
//! A batch left in `Running` with no running jobs was interrupted: the process died or was
//! stopped mid-run. [`RecoveryManager`] finds such batches, classifies what went wrong and
//! re-runs the part that did not finish.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::batch::BatchProcessor;
use crate::checkpoint::CheckpointManager;
use crate::error::{Error, Result};
use crate::persistence::JobStore;
use crate::types::{Batch, BatchId, BatchResults, Job, JobStatus, Priority};

/// Completion rate above which only the failed jobs are retried
const RETRY_FAILED_COMPLETION: f64 = 80.0;
/// Failure rate above which the errors need a look before a blind retry
const INVESTIGATE_FAILURE: f64 = 50.0;

/// How to bring an interrupted batch back
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Run only the jobs that never ran
    ResumePending,
    /// Run only the jobs that failed
    RetryFailed,
    /// Many failures; same job set as `FullRetry`, flagged for a human look
    InvestigateErrors,
    /// Run pending and failed jobs
    FullRetry,
}

impl RecoveryStrategy {
    /// Whether a job in `status` is re-run under this strategy
    pub fn selects(self, status: JobStatus) -> bool {
        match self {
            RecoveryStrategy::ResumePending => status == JobStatus::Pending,
            RecoveryStrategy::RetryFailed => status == JobStatus::Failed,
            RecoveryStrategy::InvestigateErrors | RecoveryStrategy::FullRetry => {
                matches!(status, JobStatus::Pending | JobStatus::Failed)
            }
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecoveryStrategy::ResumePending => "resume_pending",
            RecoveryStrategy::RetryFailed => "retry_failed",
            RecoveryStrategy::InvestigateErrors => "investigate_errors",
            RecoveryStrategy::FullRetry => "full_retry",
        };
        f.write_str(name)
    }
}

/// Per-status job counts of one batch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub partial: usize,
}

impl JobCounts {
    fn tally(jobs: &[Job]) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            let slot = match job.status {
                JobStatus::Pending => &mut counts.pending,
                JobStatus::Running => &mut counts.running,
                JobStatus::Completed => &mut counts.completed,
                JobStatus::Failed => &mut counts.failed,
                JobStatus::Skipped => &mut counts.skipped,
                JobStatus::Cancelled => &mut counts.cancelled,
                JobStatus::Partial => &mut counts.partial,
            };
            *slot += 1;
        }
        counts
    }
}

/// A batch that stopped before finishing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterruptedBatch {
    /// The stored batch record
    pub batch: Batch,
    /// Jobs that never ran
    pub pending_jobs: usize,
    /// Jobs that failed
    pub failed_jobs: usize,
    /// Jobs that completed
    pub completed_jobs: usize,
    /// Whether a checkpoint exists for the batch
    pub has_checkpoint: bool,
}

/// What went wrong in a batch and what to do about it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    /// Batch analyzed
    pub batch_id: BatchId,
    /// Jobs stored for the batch
    pub total_jobs: usize,
    /// Jobs per status
    pub status_counts: JobCounts,
    /// Completed jobs as a percentage of all jobs
    pub completion_rate: f64,
    /// Failed jobs as a percentage of all jobs
    pub failure_rate: f64,
    /// Failed jobs per error category (`timeout`, `connection`, `http`, `other`)
    pub error_types: BTreeMap<String, usize>,
    /// Whether a checkpoint exists for the batch
    pub has_checkpoint: bool,
    /// Suggested strategy
    pub recommended_strategy: RecoveryStrategy,
}

/// One step of a [`RecoveryPlan`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStep {
    /// Position in the plan, starting at 1
    pub order: u32,
    /// Short machine-readable name
    pub action: String,
    /// What the step does for this batch
    pub description: String,
}

/// Ordered plan for recovering one batch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    /// Batch to recover
    pub batch_id: BatchId,
    /// Strategy the plan applies
    pub strategy: RecoveryStrategy,
    /// Cleanup, strategy and resume steps
    pub steps: Vec<RecoveryStep>,
    /// Rough chance of a clean recovery, between 0.1 and 0.95
    pub success_probability: f64,
    /// Qualitative risks, or `["low risk"]`
    pub risks: Vec<String>,
    /// Analysis the plan was built from
    pub analysis: FailureAnalysis,
}

/// Finds and recovers interrupted batches
#[derive(Clone)]
pub struct RecoveryManager {
    store: Arc<dyn JobStore>,
    checkpoints: Option<CheckpointManager>,
}

impl RecoveryManager {
    /// Create a manager without checkpoint lookups
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            checkpoints: None,
        }
    }

    /// Consult this checkpoint store when looking for interrupted batches
    pub fn with_checkpoints(mut self, checkpoints: CheckpointManager) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Batches still marked `Running` with no running job and something left to do
    ///
    /// Something left to do means pending jobs or a checkpoint on disk.
    pub async fn find_interrupted_batches(&self) -> Result<Vec<InterruptedBatch>> {
        let mut interrupted = Vec::new();

        for batch in self.store.list_batches_by_status(JobStatus::Running).await? {
            let jobs = self.store.get_batch_jobs(batch.id).await?;
            let counts = JobCounts::tally(&jobs);
            if counts.running > 0 {
                continue;
            }

            let has_checkpoint = self.has_checkpoint(batch.id).await;
            if counts.pending == 0 && !has_checkpoint {
                continue;
            }

            tracing::debug!(batch_id = %batch.id, pending = counts.pending, has_checkpoint, "Found interrupted batch");
            interrupted.push(InterruptedBatch {
                batch,
                pending_jobs: counts.pending,
                failed_jobs: counts.failed,
                completed_jobs: counts.completed,
                has_checkpoint,
            });
        }

        if !interrupted.is_empty() {
            tracing::info!(count = interrupted.len(), "Interrupted batches found");
        }
        Ok(interrupted)
    }

    /// Count jobs by status, classify errors and recommend a strategy
    ///
    /// Fails with [`Error::NotFound`] when the batch does not exist.
    pub async fn analyze_failure(&self, batch_id: BatchId) -> Result<FailureAnalysis> {
        self.load_batch(batch_id).await?;
        let jobs = self.store.get_batch_jobs(batch_id).await?;
        let counts = JobCounts::tally(&jobs);

        let total_jobs = jobs.len();
        let completion_rate = percentage(counts.completed, total_jobs);
        let failure_rate = percentage(counts.failed, total_jobs);

        let mut error_types = BTreeMap::new();
        for job in jobs.iter().filter(|job| job.status == JobStatus::Failed) {
            let category = classify_error(job.error_message.as_deref().unwrap_or_default());
            *error_types.entry(category.to_string()).or_insert(0) += 1;
        }

        let recommended_strategy = if completion_rate > RETRY_FAILED_COMPLETION {
            RecoveryStrategy::RetryFailed
        } else if failure_rate > INVESTIGATE_FAILURE {
            RecoveryStrategy::InvestigateErrors
        } else if counts.pending > 0 {
            RecoveryStrategy::ResumePending
        } else {
            RecoveryStrategy::FullRetry
        };

        Ok(FailureAnalysis {
            batch_id,
            total_jobs,
            status_counts: counts,
            completion_rate,
            failure_rate,
            error_types,
            has_checkpoint: self.has_checkpoint(batch_id).await,
            recommended_strategy,
        })
    }

    /// Build a three-step plan around the recommended strategy
    pub async fn create_recovery_plan(&self, batch_id: BatchId) -> Result<RecoveryPlan> {
        let analysis = self.analyze_failure(batch_id).await?;
        let strategy = analysis.recommended_strategy;
        let counts = &analysis.status_counts;

        let selected = match strategy {
            RecoveryStrategy::ResumePending => counts.pending,
            RecoveryStrategy::RetryFailed => counts.failed,
            RecoveryStrategy::InvestigateErrors | RecoveryStrategy::FullRetry => {
                counts.pending + counts.failed
            }
        };

        let steps = vec![
            RecoveryStep {
                order: 1,
                action: "cleanup_state".to_string(),
                description: format!(
                    "Reset {} failed jobs to pending and mark the batch running",
                    if strategy.selects(JobStatus::Failed) { counts.failed } else { 0 }
                ),
            },
            RecoveryStep {
                order: 2,
                action: "apply_strategy".to_string(),
                description: format!("Apply {strategy} to {selected} jobs"),
            },
            RecoveryStep {
                order: 3,
                action: "resume_processing".to_string(),
                description: format!("Process the {selected} selected jobs as a new batch"),
            },
        ];

        let success_probability = success_probability(&analysis);
        let risks = risk_flags(&analysis);

        Ok(RecoveryPlan {
            batch_id,
            strategy,
            steps,
            success_probability,
            risks,
            analysis,
        })
    }

    /// Reset and optionally re-run the jobs `strategy` selects
    ///
    /// Selected failed jobs go back to `Pending` with their error cleared and the batch is
    /// marked `Running` again. With a `processor` the selected URLs are processed as a new
    /// batch and the original batch takes its outcome; without one nothing runs and the
    /// result only reports how many jobs were selected.
    pub async fn recover_batch(
        &self,
        batch_id: BatchId,
        strategy: RecoveryStrategy,
        processor: Option<&BatchProcessor>,
    ) -> Result<BatchResults> {
        let batch = self.load_batch(batch_id).await?;
        let jobs = self.store.get_batch_jobs(batch_id).await?;
        let selected: Vec<Job> = jobs
            .into_iter()
            .filter(|job| strategy.selects(job.status))
            .collect();

        for job in selected.iter().filter(|job| job.status == JobStatus::Failed) {
            self.store.reset_job(job.id).await?;
        }
        self.store
            .update_batch_status(batch_id, JobStatus::Running)
            .await?;

        tracing::info!(
            batch_id = %batch_id,
            %strategy,
            selected = selected.len(),
            "Recovering batch"
        );

        let Some(processor) = processor else {
            return Ok(BatchResults {
                total: selected.len(),
                ..BatchResults::default()
            });
        };

        let urls: Vec<String> = selected.iter().map(|job| job.url.clone()).collect();
        let priorities: std::collections::HashMap<String, Priority> = selected
            .iter()
            .map(|job| (job.url.clone(), job.priority))
            .collect();
        let results = processor
            .process_batch(&format!("{}_recovered", batch.name), &urls, Some(&priorities))
            .await?;

        let status = if results.failed.is_empty() {
            JobStatus::Completed
        } else if results.successful.is_empty() {
            JobStatus::Failed
        } else {
            JobStatus::Partial
        };
        self.store.update_batch_status(batch_id, status).await?;

        Ok(results)
    }

    async fn load_batch(&self, batch_id: BatchId) -> Result<Batch> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("batch {batch_id}")))
    }

    async fn has_checkpoint(&self, batch_id: BatchId) -> bool {
        match &self.checkpoints {
            Some(checkpoints) => checkpoints.has_checkpoint(batch_id).await,
            None => false,
        }
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Error categories checked in order; the first match wins
fn error_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("timeout", r"(?i)time[ds]?\s*-?out|deadline"),
            ("connection", r"(?i)connect|refused|reset|unreachable|dns|broken pipe"),
            ("http", r"(?i)\bhttp\b|\bstatus\b|\b[45]\d{2}\b"),
        ]
        .into_iter()
        .filter_map(|(category, pattern)| {
            Regex::new(pattern)
                .map_err(|e| tracing::warn!(category, error = %e, "Invalid error pattern"))
                .ok()
                .map(|regex| (category, regex))
        })
        .collect()
    })
}

/// Category of a job's error message
fn classify_error(message: &str) -> &'static str {
    error_patterns()
        .iter()
        .find(|(_, regex)| regex.is_match(message))
        .map(|(category, _)| *category)
        .unwrap_or("other")
}

fn success_probability(analysis: &FailureAnalysis) -> f64 {
    let mut probability: f64 = 0.7;
    if analysis.completion_rate > 50.0 {
        probability += 0.2;
    }
    if analysis.completion_rate < 20.0 {
        probability -= 0.2;
    }
    if analysis.failure_rate > 50.0 {
        probability -= 0.3;
    }
    if analysis.failure_rate < 10.0 {
        probability += 0.1;
    }
    probability.clamp(0.1, 0.95)
}

fn risk_flags(analysis: &FailureAnalysis) -> Vec<String> {
    let mut risks = Vec::new();
    if analysis.failure_rate > INVESTIGATE_FAILURE {
        risks.push("high failure rate".to_string());
    }
    if analysis.error_types.contains_key("timeout") {
        risks.push("timeout errors, target may be slow or overloaded".to_string());
    }
    if analysis.error_types.contains_key("connection") {
        risks.push("connection errors, target may be unreachable".to_string());
    }
    if !analysis.has_checkpoint {
        risks.push("no checkpoint available".to_string());
    }
    if risks.is_empty() {
        risks.push("low risk".to_string());
    }
    risks
}
