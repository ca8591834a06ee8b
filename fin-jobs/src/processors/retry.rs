use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use fin_queue::{ActiveJob, JobError, JobRecord, Processor};

use crate::payloads::{
    job_names, JobResult, Keyed, RetryNotificationData, RetryPaymentData, RetryTransferData,
};
use crate::processors::dead_letter_on_exhaustion;
use crate::queues::QueueName;
use crate::service::QueueService;

/// Domain side of a retry. Implementations must be idempotent on the key.
#[async_trait]
pub trait RetryActions: Send + Sync + 'static {
    async fn retry_payment(&self, data: &RetryPaymentData, idempotency_key: &str) -> Result<Value, JobError>;

    async fn retry_transfer(&self, data: &RetryTransferData, idempotency_key: &str) -> Result<Value, JobError>;

    async fn retry_notification(
        &self,
        data: &RetryNotificationData,
        idempotency_key: &str,
    ) -> Result<Value, JobError>;
}

/// Records the retry and reports it as done
#[derive(Debug, Default, Clone)]
pub struct LoggingRetryActions;

#[async_trait]
impl RetryActions for LoggingRetryActions {
    async fn retry_payment(&self, data: &RetryPaymentData, idempotency_key: &str) -> Result<Value, JobError> {
        info!(
            transaction_id = %data.transaction_id,
            amount = data.amount,
            currency = %data.currency,
            attempt_number = data.attempt_number,
            idempotency_key,
            "Retrying payment"
        );
        Ok(json!({ "transactionId": data.transaction_id, "retried": true }))
    }

    async fn retry_transfer(&self, data: &RetryTransferData, idempotency_key: &str) -> Result<Value, JobError> {
        info!(
            transfer_id = %data.transfer_id,
            from = %data.from_account_id,
            to = %data.to_account_id,
            attempt_number = data.attempt_number,
            idempotency_key,
            "Retrying transfer"
        );
        Ok(json!({ "transferId": data.transfer_id, "retried": true }))
    }

    async fn retry_notification(
        &self,
        data: &RetryNotificationData,
        idempotency_key: &str,
    ) -> Result<Value, JobError> {
        info!(
            notification_id = %data.notification_id,
            channel = ?data.channel,
            idempotency_key,
            "Retrying notification"
        );
        Ok(json!({ "notificationId": data.notification_id, "channel": data.channel, "retried": true }))
    }
}

/// Payment, transfer and notification retries
pub struct RetryJobsProcessor {
    actions: Arc<dyn RetryActions>,
    service: QueueService,
}

impl RetryJobsProcessor {
    pub fn new(actions: Arc<dyn RetryActions>, service: QueueService) -> Self {
        Self { actions, service }
    }
}

#[async_trait]
impl Processor for RetryJobsProcessor {
    async fn process(&self, job: &ActiveJob) -> Result<Value, JobError> {
        let started = Instant::now();

        match job.name() {
            job_names::RETRY_PAYMENT => {
                let Keyed { data, idempotency_key } = job.payload::<Keyed<RetryPaymentData>>()?;
                let outcome = self.actions.retry_payment(&data, &idempotency_key).await?;
                JobResult::success(outcome, started, idempotency_key).into_value()
            }
            job_names::RETRY_TRANSFER => {
                let Keyed { data, idempotency_key } = job.payload::<Keyed<RetryTransferData>>()?;
                let outcome = self.actions.retry_transfer(&data, &idempotency_key).await?;
                JobResult::success(outcome, started, idempotency_key).into_value()
            }
            job_names::RETRY_NOTIFICATION => {
                let Keyed { data, idempotency_key } = job.payload::<Keyed<RetryNotificationData>>()?;
                let outcome = self.actions.retry_notification(&data, &idempotency_key).await?;
                JobResult::success(outcome, started, idempotency_key).into_value()
            }
            other => Err(JobError::new(format!("Unknown job name: {}", other))),
        }
    }

    async fn on_failed(&self, job: &JobRecord, error: &JobError) {
        dead_letter_on_exhaustion(&self.service, QueueName::RetryJobs, job, error).await;
    }
}
