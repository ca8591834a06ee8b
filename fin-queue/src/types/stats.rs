use serde::{Deserialize, Serialize};

/// Point-in-time job counts for one queue.
///
/// Counters are read independently; no cross-field consistency is implied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queue_name: String,
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    /// Waiting jobs held back because the queue is paused
    pub paused: u64,
}

impl QueueStats {
    pub fn empty(queue_name: &str) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            ..Self::default()
        }
    }
}
