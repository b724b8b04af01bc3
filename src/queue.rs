//! Five-tier priority queue for work items.
//!
//! Items live in one binary heap per [`Priority`] tier. Extraction scans the tiers from
//! Urgent to Deferred and takes the oldest item of the first non-empty tier, so order is
//! strict across tiers and FIFO within a tier. Extracted items move to an in-flight map
//! until the owner reports an outcome.
//!
//! The queue itself is not synchronized; owners wrap it in a mutex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap};

use crate::config::RebalanceConfig;
use crate::types::{BatchId, Priority, WorkItem};

const TIER_COUNT: usize = Priority::ALL.len();

/// Heap entry wrapping a [`WorkItem`]
#[derive(Debug, Clone)]
struct QueuedItem(WorkItem);

impl QueuedItem {
    fn key(&self) -> (Priority, DateTime<Utc>, u64) {
        (self.0.priority, self.0.enqueued_at, self.0.sequence)
    }
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedItem {}

// Implement Ord for BinaryHeap (max-heap by default)
impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: the smallest (priority, enqueued_at, sequence) must surface first
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Serializable dump of a [`PriorityQueue`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Waiting items, most urgent first
    pub items: Vec<WorkItem>,
    /// Items that were being processed when the snapshot was taken
    #[serde(default)]
    pub in_flight: Vec<WorkItem>,
    /// URLs that exhausted their retries, with their final retry count
    #[serde(default)]
    pub failed_items: HashMap<String, u32>,
    /// Successful completions
    #[serde(default)]
    pub total_processed: u64,
    /// Failed processing rounds
    #[serde(default)]
    pub total_failed: u64,
    /// Next admission sequence number
    #[serde(default)]
    pub next_sequence: u64,
}

/// Bounded five-tier priority queue
#[derive(Debug)]
pub struct PriorityQueue {
    tiers: [BinaryHeap<QueuedItem>; TIER_COUNT],
    len: usize,
    max_size: usize,
    next_sequence: u64,
    /// In-flight items keyed by admission sequence, so two copies of one URL stay distinct
    processing: HashMap<u64, WorkItem>,
    failed_items: HashMap<String, u32>,
    total_processed: u64,
    total_failed: u64,
}

impl PriorityQueue {
    /// Create an empty queue admitting at most `max_size` waiting items
    pub fn new(max_size: usize) -> Self {
        Self {
            tiers: Default::default(),
            len: 0,
            max_size,
            next_sequence: 0,
            processing: HashMap::new(),
            failed_items: HashMap::new(),
            total_processed: 0,
            total_failed: 0,
        }
    }

    /// Admit a new URL
    ///
    /// Returns `false` without side effects when the queue already holds `max_size` items.
    pub fn add(
        &mut self,
        url: impl Into<String>,
        priority: Priority,
        batch_id: Option<BatchId>,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> bool {
        let item = WorkItem::new(url, priority)
            .with_batch(batch_id)
            .with_metadata(metadata.unwrap_or_default());
        self.push(item)
    }

    /// Admit URLs one by one, stopping at the first rejection
    ///
    /// Returns the number actually admitted.
    pub fn add_batch<I, S>(&mut self, urls: I, priority: Priority, batch_id: Option<BatchId>) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for url in urls {
            if !self.add(url, priority, batch_id, None) {
                break;
            }
            added += 1;
        }
        added
    }

    /// Admit an existing item, keeping its timestamp, retry count and batch
    ///
    /// The item gets a fresh admission sequence number.
    pub fn push(&mut self, mut item: WorkItem) -> bool {
        if self.len >= self.max_size {
            return false;
        }
        item.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.tiers[item.priority.index()].push(QueuedItem(item));
        self.len += 1;
        true
    }

    /// Take the most urgent, oldest item and mark its URL as in flight
    ///
    /// Returns `None` when every tier is empty.
    pub fn next(&mut self) -> Option<WorkItem> {
        for tier in self.tiers.iter_mut() {
            if let Some(QueuedItem(item)) = tier.pop() {
                self.len -= 1;
                self.processing.insert(item.sequence, item.clone());
                return Some(item);
            }
        }
        None
    }

    /// Promote items that waited longer than their tier's threshold by one tier
    ///
    /// Tiers are swept from the most urgent threshold down, so an item moves at most one
    /// tier per sweep. Returns the number of promoted items.
    pub fn rebalance(&mut self, thresholds: &RebalanceConfig, now: DateTime<Utc>) -> usize {
        let rules = [
            (Priority::Normal, thresholds.normal_to_high),
            (Priority::Low, thresholds.low_to_normal),
            (Priority::Deferred, thresholds.deferred_to_low),
        ];

        let mut promoted = 0;
        for (tier, threshold) in rules {
            let Some(threshold) = threshold else {
                continue;
            };
            let Ok(threshold) = chrono::Duration::from_std(threshold) else {
                continue;
            };
            let target = tier.promoted();

            let (aged, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tiers[tier.index()])
                .into_iter()
                .partition(|queued| now - queued.0.enqueued_at >= threshold);
            self.tiers[tier.index()] = waiting.into_iter().collect();

            for QueuedItem(mut item) in aged {
                item.priority = target;
                self.tiers[target.index()].push(QueuedItem(item));
                promoted += 1;
            }
        }

        if promoted > 0 {
            tracing::debug!(promoted, "Promoted aged queue items");
        }
        promoted
    }

    /// Record a successful completion of an item handed out by [`next`](Self::next)
    pub fn record_success(&mut self, item: &WorkItem) {
        self.processing.remove(&item.sequence);
        self.failed_items.remove(&item.url);
        self.total_processed += 1;
    }

    /// Record a failed processing round of an item handed out by [`next`](Self::next)
    pub fn record_failure(&mut self, item: &WorkItem) {
        self.processing.remove(&item.sequence);
        self.total_failed += 1;
    }

    /// Record that a URL will not be retried again
    pub fn record_abandoned(&mut self, url: &str, retry_count: u32) {
        self.failed_items.insert(url.to_string(), retry_count);
    }

    /// Whether any copy of a URL is currently in flight
    pub fn is_processing(&self, url: &str) -> bool {
        self.processing.values().any(|item| item.url == url)
    }

    /// Number of in-flight items, counting each admitted copy of a URL
    pub fn in_flight(&self) -> usize {
        self.processing.len()
    }

    /// Waiting items across all tiers
    pub fn size(&self) -> usize {
        self.len
    }

    /// Whether no items are waiting
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Waiting items in one tier
    pub fn tier_len(&self, priority: Priority) -> usize {
        self.tiers[priority.index()].len()
    }

    /// Admission limit
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// URLs that exhausted their retries
    pub fn failed_items(&self) -> &HashMap<String, u32> {
        &self.failed_items
    }

    /// Successful completions
    pub fn total_processed(&self) -> u64 {
        self.total_processed
    }

    /// Failed processing rounds
    pub fn total_failed(&self) -> u64 {
        self.total_failed
    }

    /// Dump every tier, the in-flight items, and the counters
    pub fn snapshot(&self) -> QueueSnapshot {
        let mut items = Vec::with_capacity(self.len);
        for tier in &self.tiers {
            let mut entries: Vec<&QueuedItem> = tier.iter().collect();
            entries.sort_by_key(|queued| (queued.0.enqueued_at, queued.0.sequence));
            items.extend(entries.into_iter().map(|queued| queued.0.clone()));
        }

        let mut in_flight: Vec<WorkItem> = self.processing.values().cloned().collect();
        in_flight.sort_by_key(|item| (item.priority, item.enqueued_at, item.sequence));

        QueueSnapshot {
            items,
            in_flight,
            failed_items: self.failed_items.clone(),
            total_processed: self.total_processed,
            total_failed: self.total_failed,
            next_sequence: self.next_sequence,
        }
    }

    /// Replace the queue contents with a snapshot
    ///
    /// Items that were in flight are put back into their tiers since they never reported
    /// an outcome. Restoring ignores the admission limit so nothing from the snapshot is lost.
    pub fn restore(&mut self, snapshot: QueueSnapshot) {
        self.tiers = Default::default();
        self.len = 0;
        self.processing.clear();
        self.failed_items = snapshot.failed_items;
        self.total_processed = snapshot.total_processed;
        self.total_failed = snapshot.total_failed;

        let mut max_sequence = snapshot.next_sequence;
        for item in snapshot.items.into_iter().chain(snapshot.in_flight) {
            max_sequence = max_sequence.max(item.sequence + 1);
            self.tiers[item.priority.index()].push(QueuedItem(item));
            self.len += 1;
        }
        self.next_sequence = max_sequence;
    }
}
