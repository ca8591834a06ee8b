use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::error;

use fin_queue::{ActiveJob, JobError, Processor};

use crate::payloads::{job_names, DeadLetterJobData, JobResult};

/// Terminal sink for exhausted jobs. Logs and acknowledges; never dead-letters itself.
#[derive(Debug, Default)]
pub struct DeadLetterProcessor;

impl DeadLetterProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Processor for DeadLetterProcessor {
    async fn process(&self, job: &ActiveJob) -> Result<Value, JobError> {
        let started = Instant::now();

        if job.name() != job_names::PROCESS_DLQ {
            return Err(JobError::new(format!("Unknown job name: {}", job.name())));
        }

        let data: DeadLetterJobData = job.payload()?;
        error!(
            original_queue = %data.original_queue,
            original_job_name = %data.original_job_name,
            failure_reason = %data.failure_reason,
            failed_at = %data.failed_at,
            attempts_made = data.attempts_made,
            idempotency_key = %data.idempotency_key,
            original_job_data = %data.original_job_data,
            "Dead-letter job recorded"
        );

        JobResult::success(
            json!({
                "logged": true,
                "originalQueue": data.original_queue,
                "originalJobName": data.original_job_name,
                "failureReason": data.failure_reason,
                "attemptsMade": data.attempts_made,
                "failedAt": data.failed_at,
            }),
            started,
            data.idempotency_key,
        )
        .into_value()
    }
}
