#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::{
    Admission, CleanState, JobEvent, JobId, JobOptions, JobOutcome, JobRecord, JobState,
    LeasedJob, QueueError, QueueResult, QueueStats, types::LeaseToken,
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Failure reason recorded when a job exceeds its stall budget
pub const STALLED_LIMIT_REASON: &str = "job stalled more than allowable limit";

/// Outcome of one stalled-job sweep
#[derive(Debug, Clone, Default)]
pub struct StalledReport {
    /// Jobs handed back to the waiting set
    pub requeued: Vec<JobId>,

    /// Jobs failed because they stalled too often
    pub failed: Vec<JobRecord>,
}

impl StalledReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// One named durable queue.
///
/// Implementations own ordering (priority, then admission order), delayed
/// promotion, lease bookkeeping and per-job idempotency.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue name as used by the registry and the dashboard
    fn name(&self) -> &str;

    /// Admit a job. A job whose ID already exists is left untouched and
    /// returned with `created == false`.
    async fn enqueue(&self, name: &str, data: Value, opts: JobOptions) -> QueueResult<Admission>;

    /// Lease the next eligible job, promoting due delayed jobs first.
    /// Returns `None` when the queue is empty or paused.
    async fn lease(&self, lock_duration: Duration) -> QueueResult<Option<LeasedJob>>;

    /// Push the lease deadline to `now + lock_duration`
    async fn extend_lease(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        lock_duration: Duration,
    ) -> QueueResult<DateTime<Utc>>;

    /// Record progress (0-100) for an active job
    async fn update_progress(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        progress: u8,
    ) -> QueueResult<()>;

    /// Acknowledge success
    async fn ack(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        return_value: Value,
    ) -> QueueResult<JobRecord>;

    /// Acknowledge failure. With `retry_at` and attempts left the job is
    /// delayed until then, otherwise it fails permanently.
    async fn nack(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<JobRecord>;

    /// Return jobs with expired leases to waiting, or fail them once they
    /// have stalled more than `max_stalled_count` times.
    async fn reclaim_stalled(&self, max_stalled_count: u32) -> QueueResult<StalledReport>;

    async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Failed jobs, newest first, `start..=end` inclusive
    async fn get_failed(&self, start: usize, end: usize) -> QueueResult<Vec<JobRecord>>;

    /// Re-admit a failed job with a fresh attempt budget
    async fn retry_job(&self, job_id: &JobId) -> QueueResult<JobRecord>;

    async fn stats(&self) -> QueueResult<QueueStats>;

    /// Stop handing out leases; in-flight jobs run to completion
    async fn pause(&self) -> QueueResult<()>;

    async fn resume(&self) -> QueueResult<()>;

    async fn is_paused(&self) -> QueueResult<bool>;

    /// Remove terminal jobs in `state` finished more than `grace` ago.
    /// A `limit` of zero means no limit.
    async fn clean(&self, grace: Duration, limit: usize, state: CleanState) -> QueueResult<Vec<JobId>>;

    /// Subscribe to lifecycle events emitted by this process
    fn subscribe(&self) -> broadcast::Receiver<JobEvent>;

    /// Event stream for observability (boxed for stable Rust)
    fn event_stream(&self) -> BoxStream<JobEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(self.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}

/// Wait until a job reaches a terminal state.
///
/// Events wake the waiter early; the periodic re-read covers jobs finished by
/// another process.
pub async fn wait_for_outcome(
    queue: &dyn JobQueue,
    job_id: &JobId,
    timeout: Duration,
) -> QueueResult<JobOutcome> {
    let mut events = queue.subscribe();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut tick = tokio::time::interval(Duration::from_millis(250));

    loop {
        let record = queue
            .get_job(job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        match record.state {
            JobState::Completed => {
                return Ok(JobOutcome::Completed(record.return_value.unwrap_or(Value::Null)));
            }
            JobState::Failed => {
                return Ok(JobOutcome::Failed(record.failed_reason.unwrap_or_default()));
            }
            _ => {}
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(QueueError::Timeout(job_id.to_string()));
            }
            _ = events.recv() => {}
            _ = tick.tick() => {}
        }
    }
}
