//! One processor per queue, each dispatching on the job name.

pub mod dead_letter;
pub mod fraud;
pub mod reconciliation;
pub mod retry;
pub mod webhook;

pub use dead_letter::DeadLetterProcessor;
pub use fraud::{FraudAssessment, FraudScoringProcessor, Recommendation, RiskLevel};
pub use reconciliation::{
    BalanceSnapshot, InMemoryReconciliationSource, LedgerEntry, LedgerTotals,
    ReconciliationProcessor, ReconciliationSource,
};
pub use retry::{LoggingRetryActions, RetryActions, RetryJobsProcessor};
pub use webhook::{sign_payload, WebhookDispatchProcessor, SIGNATURE_HEADER};

use chrono::Utc;
use tracing::error;

use fin_queue::{JobError, JobRecord, JobState};

use crate::payloads::DeadLetterJobData;
use crate::queues::QueueName;
use crate::service::QueueService;

/// Move a job that will not run again onto the dead-letter queue.
///
/// Retries in flight are ignored; only records already in `failed` state
/// (attempts exhausted, or stalled too often) produce a dead-letter job.
pub(crate) async fn dead_letter_on_exhaustion(
    service: &QueueService,
    queue: QueueName,
    record: &JobRecord,
    error: &JobError,
) {
    if record.state != JobState::Failed {
        return;
    }

    let idempotency_key = record
        .data
        .get("idempotencyKey")
        .and_then(|key| key.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| record.id.to_string());

    let dead_letter = DeadLetterJobData {
        original_queue: queue.as_str().to_string(),
        original_job_name: record.name.clone(),
        original_job_data: record.data.clone(),
        failure_reason: error.message().to_string(),
        failed_at: record.finished_on.unwrap_or_else(Utc::now),
        attempts_made: record.attempts_made,
        idempotency_key,
    };

    match service.enqueue_dead_letter(dead_letter).await {
        Ok(handle) => {
            if handle.created {
                service.metrics().record_dead_lettered(queue.as_str());
            }
            error!(
                queue = %queue,
                job_id = %record.id,
                dead_letter_id = %handle.job_id,
                attempts_made = record.attempts_made,
                "Job exhausted its attempts, moved to dead-letter queue"
            );
        }
        Err(e) => error!(
            queue = %queue,
            job_id = %record.id,
            "Failed to enqueue dead-letter job: {}",
            e
        ),
    }
}
