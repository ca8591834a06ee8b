use std::sync::Arc;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{backend::JobQueue, JobError, JobId, JobRecord, QueueResult, types::LeaseToken};

/// A job currently leased by this worker
#[derive(Clone)]
pub struct ActiveJob {
    pub record: JobRecord,
    pub lease_token: LeaseToken,
    queue: Arc<dyn JobQueue>,
}

impl ActiveJob {
    pub fn new(record: JobRecord, lease_token: LeaseToken, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            record,
            lease_token,
            queue,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.record.id
    }

    /// Job name used for dispatch
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// 1-based number of the attempt currently running
    pub fn attempt(&self) -> u32 {
        self.record.attempts_made
    }

    /// Decode the payload into a typed struct
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        Ok(serde_json::from_value(self.record.data.clone())?)
    }

    /// Report progress (0-100)
    pub async fn update_progress(&self, progress: u8) -> QueueResult<()> {
        self.queue
            .update_progress(&self.record.id, &self.lease_token, progress)
            .await
    }
}

/// Handler for the jobs of one queue
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Run one attempt. The returned value is stored as the job's result.
    async fn process(&self, job: &ActiveJob) -> Result<Value, JobError>;

    /// Called after every failed attempt with the job as persisted. A job in
    /// [`JobState::Failed`](crate::JobState::Failed) will not be retried.
    async fn on_failed(&self, _job: &JobRecord, _error: &JobError) {}
}
