use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use fin_queue::{
    wait_for_outcome, CleanState, JobError, JobId, JobOptions, JobOutcome, JobQueue, JobRecord,
    LiveMetrics, QueueRegistry, QueueResult, QueueStats,
};

use crate::payloads::{
    job_names, DeadLetterJobData, DispatchWebhookData, FlagSuspiciousData, JobKind, JobResult,
    Keyed, ReconcileBalancesData, ReconcileLedgerData, ReconcileTransactionsData,
    RetryNotificationData, RetryPaymentData, RetryTransferData, ReviewAccountData,
    ScoreTransactionData,
};
use crate::queues::QueueName;

/// Reference to an admitted job
#[derive(Clone)]
pub struct JobHandle {
    pub job_id: JobId,
    pub queue_name: QueueName,
    pub job_name: String,
    pub idempotency_key: String,
    /// False when the admission was an idempotent no-op
    pub created: bool,
    queue: Arc<dyn JobQueue>,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("queue_name", &self.queue_name)
            .field("job_name", &self.job_name)
            .field("idempotency_key", &self.idempotency_key)
            .field("created", &self.created)
            .finish()
    }
}

impl JobHandle {
    /// Wait for the job to finish.
    ///
    /// The outer error covers the wait itself (timeout, unknown job); the
    /// inner one is the job's terminal failure reason.
    pub async fn wait(&self, timeout: Duration) -> QueueResult<Result<JobResult, JobError>> {
        match wait_for_outcome(self.queue.as_ref(), &self.job_id, timeout).await? {
            JobOutcome::Completed(value) => Ok(Ok(serde_json::from_value(value)?)),
            JobOutcome::Failed(reason) => Ok(Err(JobError::new(reason))),
        }
    }

    /// Current stored record
    pub async fn record(&self) -> QueueResult<Option<JobRecord>> {
        self.queue.get_job(&self.job_id).await
    }
}

/// Admission and control-plane entry point for every queue.
///
/// Cheap to clone; clones share the registry and metrics.
#[derive(Clone)]
pub struct QueueService {
    registry: QueueRegistry,
    metrics: LiveMetrics,
}

impl QueueService {
    pub fn new(registry: QueueRegistry, metrics: LiveMetrics) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &LiveMetrics {
        &self.metrics
    }

    /// Admit a typed job on its queue.
    ///
    /// The job ID is `<job name>-<idempotency key>`; a missing key gets a
    /// random one, so no deduplication happens for it.
    #[instrument(skip(self, data, idempotency_key), fields(job_name = T::NAME, queue = %T::QUEUE))]
    pub async fn enqueue<T: JobKind>(&self, data: T, idempotency_key: Option<String>) -> QueueResult<JobHandle> {
        let key = idempotency_key.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut opts = T::QUEUE
            .default_options()
            .with_job_id(JobId::for_key(T::NAME, &key));
        if let Some(priority) = data.priority() {
            opts = opts.with_priority(priority);
        }

        let payload = serde_json::to_value(Keyed {
            data,
            idempotency_key: key.clone(),
        })?;

        self.submit(T::QUEUE, T::NAME, payload, opts, key).await
    }

    pub async fn enqueue_retry_payment(&self, data: RetryPaymentData, key: Option<String>) -> QueueResult<JobHandle> {
        self.enqueue(data, key).await
    }

    pub async fn enqueue_retry_transfer(&self, data: RetryTransferData, key: Option<String>) -> QueueResult<JobHandle> {
        self.enqueue(data, key).await
    }

    pub async fn enqueue_retry_notification(
        &self,
        data: RetryNotificationData,
        key: Option<String>,
    ) -> QueueResult<JobHandle> {
        self.enqueue(data, key).await
    }

    pub async fn enqueue_reconcile_transactions(
        &self,
        data: ReconcileTransactionsData,
        key: Option<String>,
    ) -> QueueResult<JobHandle> {
        self.enqueue(data, key).await
    }

    pub async fn enqueue_reconcile_balances(
        &self,
        data: ReconcileBalancesData,
        key: Option<String>,
    ) -> QueueResult<JobHandle> {
        self.enqueue(data, key).await
    }

    pub async fn enqueue_reconcile_ledger(&self, data: ReconcileLedgerData, key: Option<String>) -> QueueResult<JobHandle> {
        self.enqueue(data, key).await
    }

    /// Always priority 1
    pub async fn enqueue_score_transaction(
        &self,
        data: ScoreTransactionData,
        key: Option<String>,
    ) -> QueueResult<JobHandle> {
        self.enqueue(data, key).await
    }

    /// Priority follows `data.priority`: critical 1, high 2, anything else 3
    pub async fn enqueue_review_account(&self, data: ReviewAccountData, key: Option<String>) -> QueueResult<JobHandle> {
        self.enqueue(data, key).await
    }

    /// Unprioritised; runs after every prioritised fraud job
    pub async fn enqueue_flag_suspicious(&self, data: FlagSuspiciousData, key: Option<String>) -> QueueResult<JobHandle> {
        self.enqueue(data, key).await
    }

    pub async fn enqueue_dispatch_webhook(
        &self,
        data: DispatchWebhookData,
        key: Option<String>,
    ) -> QueueResult<JobHandle> {
        self.enqueue(data, key).await
    }

    /// Record an exhausted job on the dead-letter queue.
    ///
    /// The failure time is part of the ID so a job that exhausts again after a
    /// manual retry lands a second time.
    #[instrument(skip(self, data), fields(original_queue = %data.original_queue, idempotency_key = %data.idempotency_key))]
    pub async fn enqueue_dead_letter(&self, data: DeadLetterJobData) -> QueueResult<JobHandle> {
        let key = data.idempotency_key.clone();
        let job_id = JobId::for_key(
            job_names::PROCESS_DLQ,
            &format!("{}-{}", key, data.failed_at.timestamp_millis()),
        );
        let opts = QueueName::DeadLetter.default_options().with_job_id(job_id);
        let payload = serde_json::to_value(&data)?;

        self.submit(QueueName::DeadLetter, job_names::PROCESS_DLQ, payload, opts, key)
            .await
    }

    async fn submit(
        &self,
        queue_name: QueueName,
        job_name: &str,
        payload: Value,
        opts: JobOptions,
        idempotency_key: String,
    ) -> QueueResult<JobHandle> {
        let queue = self.registry.require(queue_name.as_str())?;
        let admission = queue.enqueue(job_name, payload, opts).await?;

        if admission.created {
            self.metrics.record_added(queue_name.as_str());
            debug!(job_id = %admission.record.id, "Job admitted");
        } else {
            debug!(job_id = %admission.record.id, state = admission.record.state.name(), "Duplicate admission ignored");
        }

        Ok(JobHandle {
            job_id: admission.record.id,
            queue_name,
            job_name: job_name.to_string(),
            idempotency_key,
            created: admission.created,
            queue,
        })
    }

    /// Point-in-time counters for one queue; `None` for unknown names
    pub async fn get_queue_stats(&self, queue_name: &str) -> QueueResult<Option<QueueStats>> {
        match self.registry.get(queue_name) {
            Some(queue) => Ok(Some(queue.stats().await?)),
            None => Ok(None),
        }
    }

    /// One snapshot per queue, in declaration order
    pub async fn get_all_queue_stats(&self) -> QueueResult<Vec<QueueStats>> {
        let mut stats = Vec::with_capacity(self.registry.len());
        for queue in self.registry.iter() {
            stats.push(queue.stats().await?);
        }
        Ok(stats)
    }

    /// Failed jobs newest first, `start..=end`. Unknown queues have none.
    pub async fn get_failed_jobs(&self, queue_name: &str, start: usize, end: usize) -> QueueResult<Vec<JobRecord>> {
        match self.registry.get(queue_name) {
            Some(queue) => queue.get_failed(start, end).await,
            None => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self))]
    pub async fn retry_failed_job(&self, queue_name: &str, job_id: &str) -> QueueResult<JobRecord> {
        let queue = self.registry.require(queue_name)?;
        let record = queue.retry_job(&JobId::from(job_id)).await?;
        info!(queue = %queue_name, job_id = %job_id, "Failed job re-admitted");
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn pause_queue(&self, queue_name: &str) -> QueueResult<()> {
        self.registry.require(queue_name)?.pause().await?;
        info!(queue = %queue_name, "Queue paused");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn resume_queue(&self, queue_name: &str) -> QueueResult<()> {
        self.registry.require(queue_name)?.resume().await?;
        info!(queue = %queue_name, "Queue resumed");
        Ok(())
    }

    /// Remove up to `limit` jobs (0 = all) in `state` finished more than
    /// `grace` ago
    #[instrument(skip(self))]
    pub async fn clean_queue(
        &self,
        queue_name: &str,
        grace: Duration,
        limit: usize,
        state: CleanState,
    ) -> QueueResult<Vec<JobId>> {
        let removed = self
            .registry
            .require(queue_name)?
            .clean(grace, limit, state)
            .await?;
        info!(queue = %queue_name, state = ?state, removed = removed.len(), "Queue cleaned");
        Ok(removed)
    }

    /// Resume every queue a previous run left paused; returns their names
    pub async fn resume_paused_queues(&self) -> QueueResult<Vec<String>> {
        let mut resumed = Vec::new();
        for queue in self.registry.iter() {
            if queue.is_paused().await? {
                warn!(queue = %queue.name(), "Queue was left paused, resuming");
                queue.resume().await?;
                resumed.push(queue.name().to_string());
            }
        }
        Ok(resumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::ReviewPriority;
    use fin_queue::MemoryBackend;

    fn service() -> QueueService {
        let mut registry = QueueRegistry::new();
        for name in QueueName::ALL {
            registry.register(Arc::new(MemoryBackend::new(name.as_str()))).unwrap();
        }
        QueueService::new(registry, LiveMetrics::new())
    }

    fn review(priority: ReviewPriority) -> ReviewAccountData {
        ReviewAccountData {
            account_id: "acc-1".into(),
            trigger_reason: "velocity".into(),
            priority,
        }
    }

    #[tokio::test]
    async fn job_id_combines_name_and_key() {
        let service = service();
        let handle = service
            .enqueue_reconcile_ledger(
                ReconcileLedgerData {
                    ledger_id: "main".into(),
                    period: "2024-06".into(),
                },
                Some("l-1".into()),
            )
            .await
            .unwrap();

        assert_eq!(handle.job_id.as_str(), "reconcile-ledger-l-1");
        assert_eq!(handle.queue_name, QueueName::Reconciliation);

        let record = handle.record().await.unwrap().unwrap();
        assert_eq!(record.opts.attempts, 3);
        assert_eq!(record.data["idempotencyKey"], "l-1");
    }

    #[tokio::test]
    async fn missing_key_is_generated() {
        let service = service();
        let a = service.enqueue_review_account(review(ReviewPriority::Low), None).await.unwrap();
        let b = service.enqueue_review_account(review(ReviewPriority::Low), None).await.unwrap();

        assert!(a.created && b.created);
        assert_ne!(a.job_id, b.job_id);
        assert_eq!(service.metrics().queue_snapshot("fraud-scoring").added, 2);
    }

    #[tokio::test]
    async fn unknown_queue_controls_fail_fast() {
        let service = service();

        assert_eq!(service.get_queue_stats("nope").await.unwrap(), None);
        assert!(service.get_failed_jobs("nope", 0, 10).await.unwrap().is_empty());
        assert_eq!(
            service.pause_queue("nope").await.unwrap_err().to_string(),
            "Queue nope not found"
        );
    }

    #[tokio::test]
    async fn paused_queues_are_resumed_at_startup() {
        let service = service();
        service.pause_queue("webhook-dispatch").await.unwrap();

        let resumed = service.resume_paused_queues().await.unwrap();
        assert_eq!(resumed, vec!["webhook-dispatch".to_string()]);
        assert!(service.resume_paused_queues().await.unwrap().is_empty());
    }
}
