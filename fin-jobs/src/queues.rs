use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use fin_queue::{Backoff, JobOptions};

/// The five queues this engine runs, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    RetryJobs,
    Reconciliation,
    FraudScoring,
    WebhookDispatch,
    DeadLetter,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::RetryJobs,
        QueueName::Reconciliation,
        QueueName::FraudScoring,
        QueueName::WebhookDispatch,
        QueueName::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryJobs => "retry-jobs",
            Self::Reconciliation => "reconciliation",
            Self::FraudScoring => "fraud-scoring",
            Self::WebhookDispatch => "webhook-dispatch",
            Self::DeadLetter => "dead-letter",
        }
    }

    /// Worker pool size when no override is configured
    pub fn default_concurrency(&self) -> usize {
        match self {
            Self::RetryJobs => 5,
            Self::Reconciliation => 2,
            Self::FraudScoring => 10,
            Self::WebhookDispatch => 20,
            Self::DeadLetter => 1,
        }
    }

    /// Attempt budget and backoff applied to every job admitted here
    pub fn default_options(&self) -> JobOptions {
        let (attempts, base_ms) = match self {
            Self::RetryJobs => (5, 1000),
            Self::Reconciliation => (3, 1000),
            Self::FraudScoring => (3, 1000),
            Self::WebhookDispatch => (8, 2000),
            Self::DeadLetter => (1, 1000),
        };

        JobOptions::new()
            .with_attempts(attempts)
            .with_backoff(Backoff::exponential(base_ms))
    }

    /// Environment key fragment, e.g. `RETRY_JOBS`
    pub fn env_key(&self) -> String {
        self.as_str().replace('-', "_").to_uppercase()
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|queue| queue.as_str() == s)
            .ok_or_else(|| format!("Queue {} not found", s))
    }
}
