use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::JobId;

/// Delay policy between failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Backoff {
    /// Same delay before every retry
    #[serde(rename_all = "camelCase")]
    Fixed { delay_ms: u64 },

    /// `delay_ms * 2^(attempts_made - 1)`
    #[serde(rename_all = "camelCase")]
    Exponential { delay_ms: u64 },
}

impl Backoff {
    pub fn fixed(delay_ms: u64) -> Self {
        Self::Fixed { delay_ms }
    }

    pub fn exponential(delay_ms: u64) -> Self {
        Self::Exponential { delay_ms }
    }

    /// Delay before the next attempt, given how many attempts were already made
    pub fn delay(&self, attempts_made: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential { delay_ms } => {
                let exponent = attempts_made.saturating_sub(1).min(32);
                Duration::from_millis(delay_ms.saturating_mul(1u64 << exponent))
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(1000)
    }
}

/// Per-job submission options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Explicit job ID; a second admission with the same ID is a no-op
    pub job_id: Option<JobId>,

    /// Total attempts including the first one
    pub attempts: u32,

    pub backoff: Backoff,

    /// Lower values are leased first; `None` runs after every prioritised job
    pub priority: Option<u32>,

    /// Initial delay before the job becomes eligible
    pub delay_ms: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            job_id: None,
            attempts: 1,
            backoff: Backoff::default(),
            priority: None,
            delay_ms: None,
        }
    }
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis() as u64);
        self
    }

    /// Ordering rank among waiting jobs (lower first)
    pub fn priority_rank(&self) -> u32 {
        self.priority.unwrap_or(u32::MAX)
    }
}
