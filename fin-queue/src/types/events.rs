use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Queue lifecycle events broadcast to local observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum JobEvent {
    /// Job was admitted (or re-admitted after a manual retry)
    Added {
        queue: String,
        job_id: JobId,
        name: String,
        at: DateTime<Utc>,
    },

    /// Job was leased by a worker
    Active {
        queue: String,
        job_id: JobId,
        attempts_made: u32,
        at: DateTime<Utc>,
    },

    Progress {
        queue: String,
        job_id: JobId,
        progress: u8,
        at: DateTime<Utc>,
    },

    Completed {
        queue: String,
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Attempt failed, job parked until `run_at`
    Retrying {
        queue: String,
        job_id: JobId,
        run_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    /// Attempts exhausted
    Failed {
        queue: String,
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },

    /// Lease expired and the job went back to waiting
    Stalled {
        queue: String,
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Removed by `clean`
    Removed {
        queue: String,
        job_id: JobId,
        at: DateTime<Utc>,
    },

    Paused {
        queue: String,
        at: DateTime<Utc>,
    },

    Resumed {
        queue: String,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Active { .. } => "active",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Retrying { .. } => "retrying",
            Self::Failed { .. } => "failed",
            Self::Stalled { .. } => "stalled",
            Self::Removed { .. } => "removed",
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
        }
    }

    /// Job the event refers to; queue-level events have none
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::Added { job_id, .. }
            | Self::Active { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Stalled { job_id, .. }
            | Self::Removed { job_id, .. } => Some(job_id),
            Self::Paused { .. } | Self::Resumed { .. } => None,
        }
    }

    pub fn queue(&self) -> &str {
        match self {
            Self::Added { queue, .. }
            | Self::Active { queue, .. }
            | Self::Progress { queue, .. }
            | Self::Completed { queue, .. }
            | Self::Retrying { queue, .. }
            | Self::Failed { queue, .. }
            | Self::Stalled { queue, .. }
            | Self::Removed { queue, .. }
            | Self::Paused { queue, .. }
            | Self::Resumed { queue, .. } => queue,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Added { at, .. }
            | Self::Active { at, .. }
            | Self::Progress { at, .. }
            | Self::Completed { at, .. }
            | Self::Retrying { at, .. }
            | Self::Failed { at, .. }
            | Self::Stalled { at, .. }
            | Self::Removed { at, .. }
            | Self::Paused { at, .. }
            | Self::Resumed { at, .. } => at,
        }
    }

    /// True for events after which the job will not run again on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}
