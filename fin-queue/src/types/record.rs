use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use super::{JobId, JobOptions, LeaseToken};

/// Job state lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Eligible for leasing
    Waiting,

    /// Waiting for a backoff or initial delay to elapse
    Delayed,

    /// Leased by a worker
    Active,

    /// Finished successfully
    Completed,

    /// Attempts exhausted
    Failed,
}

impl JobState {
    /// Check if the job is in a terminal state (completed or failed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Get the state name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Terminal states that `clean` can purge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanState {
    Completed,
    Failed,
}

impl CleanState {
    pub fn job_state(self) -> JobState {
        match self {
            Self::Completed => JobState::Completed,
            Self::Failed => JobState::Failed,
        }
    }
}

impl Default for CleanState {
    fn default() -> Self {
        Self::Completed
    }
}

impl FromStr for CleanState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid clean state: {}", s)),
        }
    }
}

/// Job record - mutable runtime state stored by backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,

    pub queue_name: String,

    /// Job name used for processor dispatch
    pub name: String,

    pub data: Value,

    pub opts: JobOptions,

    pub state: JobState,

    /// Attempts started so far, including the one currently running
    pub attempts_made: u32,

    /// How many times the job was recovered from a dead worker
    pub stalled_count: u32,

    /// Last reported progress (0-100)
    pub progress: u8,

    pub created_at: DateTime<Utc>,

    /// When the job becomes eligible (delayed jobs only)
    pub run_at: DateTime<Utc>,

    pub processed_on: Option<DateTime<Utc>>,

    pub finished_on: Option<DateTime<Utc>>,

    pub failed_reason: Option<String>,

    pub return_value: Option<Value>,

    pub lease_token: Option<LeaseToken>,

    pub lease_until: Option<DateTime<Utc>>,

    /// Admission sequence number, FIFO tiebreaker within a priority
    pub seq: u64,
}

impl JobRecord {
    /// Create a new job record
    pub fn new(id: JobId, queue_name: &str, name: &str, data: Value, opts: JobOptions, seq: u64) -> Self {
        let now = Utc::now();
        let delay = opts.delay_ms.unwrap_or(0);
        let run_at = now + chrono::Duration::milliseconds(delay as i64);
        let state = if delay > 0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        Self {
            id,
            queue_name: queue_name.to_string(),
            name: name.to_string(),
            data,
            opts,
            state,
            attempts_made: 0,
            stalled_count: 0,
            progress: 0,
            created_at: now,
            run_at,
            processed_on: None,
            finished_on: None,
            failed_reason: None,
            return_value: None,
            lease_token: None,
            lease_until: None,
            seq,
        }
    }

    /// Total attempts allowed for this job (at least one)
    pub fn max_attempts(&self) -> u32 {
        self.opts.attempts.max(1)
    }

    /// True once the attempt budget is spent
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts()
    }

    /// Check if the lease has expired
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.state, &self.lease_until) {
            (JobState::Active, Some(lease_until)) => *lease_until < now,
            _ => false,
        }
    }

    /// Start processing with a lease
    pub fn start_processing(&mut self, lease_token: LeaseToken, lease_until: DateTime<Utc>) {
        self.state = JobState::Active;
        self.attempts_made += 1;
        self.lease_token = Some(lease_token);
        self.lease_until = Some(lease_until);
        self.processed_on = Some(Utc::now());
    }

    /// Complete the job successfully
    pub fn complete(&mut self, return_value: Value) {
        self.state = JobState::Completed;
        self.return_value = Some(return_value);
        self.progress = 100;
        self.finished_on = Some(Utc::now());
        self.clear_lease();
    }

    /// Fail the job permanently
    pub fn fail(&mut self, reason: String) {
        self.state = JobState::Failed;
        self.failed_reason = Some(reason);
        self.finished_on = Some(Utc::now());
        self.clear_lease();
    }

    /// Park the job until `run_at` after a failed attempt
    pub fn schedule_retry(&mut self, run_at: DateTime<Utc>, reason: String) {
        self.state = JobState::Delayed;
        self.run_at = run_at;
        self.failed_reason = Some(reason);
        self.clear_lease();
    }

    /// Hand a stalled job back to the waiting set; the stalled attempt is not counted
    pub fn release_stalled(&mut self) {
        self.state = JobState::Waiting;
        self.stalled_count += 1;
        self.attempts_made = self.attempts_made.saturating_sub(1);
        self.clear_lease();
    }

    /// Re-admit a failed job with a fresh attempt budget
    pub fn reset_for_retry(&mut self, seq: u64) {
        self.state = JobState::Waiting;
        self.attempts_made = 0;
        self.stalled_count = 0;
        self.progress = 0;
        self.failed_reason = None;
        self.finished_on = None;
        self.return_value = None;
        self.run_at = Utc::now();
        self.seq = seq;
        self.clear_lease();
    }

    fn clear_lease(&mut self) {
        self.lease_token = None;
        self.lease_until = None;
    }
}

/// A job that has been leased for processing
#[derive(Debug, Clone)]
pub struct LeasedJob {
    /// The job record
    pub record: JobRecord,

    /// Lease token for acknowledgment
    pub lease_token: LeaseToken,

    /// When the lease expires
    pub lease_until: DateTime<Utc>,
}

impl LeasedJob {
    /// Get the job ID
    pub fn job_id(&self) -> &JobId {
        &self.record.id
    }

    /// Check if the lease is still valid
    pub fn lease_valid(&self, now: DateTime<Utc>) -> bool {
        self.lease_until > now
    }
}

/// Result of an admission attempt
#[derive(Debug, Clone)]
pub struct Admission {
    pub record: JobRecord,

    /// False when a job with the same ID already existed
    pub created: bool,
}

/// Terminal outcome of a job, as observed by a waiting producer
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Value),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(attempts: u32) -> JobRecord {
        JobRecord::new(
            JobId::from("job-1"),
            "default",
            "test",
            json!({}),
            JobOptions::new().with_attempts(attempts),
            1,
        )
    }

    #[test]
    fn delayed_option_starts_delayed() {
        let opts = JobOptions::new().with_delay(std::time::Duration::from_secs(5));
        let record = JobRecord::new(JobId::new(), "q", "n", json!(null), opts, 1);
        assert_eq!(record.state, JobState::Delayed);
        assert!(record.run_at > record.created_at);
    }

    #[test]
    fn attempts_exhaust_at_budget() {
        let mut record = record(2);
        record.start_processing(LeaseToken::new(), Utc::now());
        assert!(!record.attempts_exhausted());
        record.schedule_retry(Utc::now(), "boom".to_string());
        record.start_processing(LeaseToken::new(), Utc::now());
        assert!(record.attempts_exhausted());
    }

    #[test]
    fn stalled_release_refunds_attempt() {
        let mut record = record(3);
        record.start_processing(LeaseToken::new(), Utc::now());
        record.release_stalled();
        assert_eq!(record.attempts_made, 0);
        assert_eq!(record.stalled_count, 1);
        assert_eq!(record.state, JobState::Waiting);
        assert!(record.lease_token.is_none());
    }

    #[test]
    fn clean_state_parses() {
        assert_eq!("failed".parse::<CleanState>(), Ok(CleanState::Failed));
        assert_eq!("Completed".parse::<CleanState>(), Ok(CleanState::Completed));
        assert!("active".parse::<CleanState>().is_err());
    }
}
