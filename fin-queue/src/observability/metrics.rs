use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use serde::Serialize;

/// Per-queue counters since process start
#[derive(Debug, Default)]
pub struct QueueCounters {
    added: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    stalled: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Snapshot of [`QueueCounters`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub added: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub stalled: u64,
    pub dead_lettered: u64,
}

impl QueueCounters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            added: self.added.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            stalled: self.stalled.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Live metrics collector for queue operations.
///
/// Cheap to clone; clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct LiveMetrics {
    queues: Arc<RwLock<BTreeMap<String, Arc<QueueCounters>>>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, queue: &str) -> Arc<QueueCounters> {
        if let Some(counters) = self.queues.read().get(queue) {
            return counters.clone();
        }
        self.queues
            .write()
            .entry(queue.to_string())
            .or_default()
            .clone()
    }

    pub fn record_added(&self, queue: &str) {
        self.counters(queue).added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, queue: &str) {
        self.counters(queue).completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, queue: &str) {
        self.counters(queue).failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self, queue: &str) {
        self.counters(queue).retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stalled(&self, queue: &str, count: u64) {
        self.counters(queue).stalled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self, queue: &str) {
        self.counters(queue).dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters for one queue; zeroes if nothing was recorded yet
    pub fn queue_snapshot(&self, queue: &str) -> CounterSnapshot {
        self.queues
            .read()
            .get(queue)
            .map(|counters| counters.snapshot())
            .unwrap_or_default()
    }

    /// Counters for every queue that recorded anything, keyed by queue name
    pub fn snapshot(&self) -> BTreeMap<String, CounterSnapshot> {
        self.queues
            .read()
            .iter()
            .map(|(name, counters)| (name.clone(), counters.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_per_queue() {
        let metrics = LiveMetrics::new();
        metrics.record_added("webhook-dispatch");
        metrics.record_added("webhook-dispatch");
        metrics.record_failed("fraud-scoring");

        assert_eq!(metrics.queue_snapshot("webhook-dispatch").added, 2);
        assert_eq!(metrics.queue_snapshot("fraud-scoring").failed, 1);
        assert_eq!(metrics.queue_snapshot("dead-letter"), CounterSnapshot::default());
        assert_eq!(metrics.snapshot().len(), 2);
    }

    #[test]
    fn clones_share_counters() {
        let metrics = LiveMetrics::new();
        let clone = metrics.clone();
        clone.record_completed("retry-jobs");
        assert_eq!(metrics.queue_snapshot("retry-jobs").completed, 1);
    }
}
