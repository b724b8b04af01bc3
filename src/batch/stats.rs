//! Counters for the current run.

use crate::types::{BatchStatistics, success_rate};

use super::{BatchProcessor, Tally};

impl BatchProcessor {
    /// Aggregates over the outcomes classified in the current (or last) run
    pub fn get_statistics(&self) -> BatchStatistics {
        let Tally {
            successful,
            failed,
            durations,
        } = self.counters.snapshot();

        let total_duration: f64 = durations.iter().sum();
        let average_duration =
            (!durations.is_empty()).then(|| total_duration / durations.len() as f64);
        let min_duration = durations.iter().copied().reduce(f64::min);
        let max_duration = durations.iter().copied().reduce(f64::max);

        BatchStatistics {
            total_processed: successful + failed,
            successful,
            failed,
            success_rate: success_rate(successful, failed),
            total_duration,
            average_duration,
            min_duration,
            max_duration,
        }
    }
}
