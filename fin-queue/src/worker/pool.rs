use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use futures::FutureExt;
use rand::Rng;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    backend::JobQueue,
    observability::LiveMetrics,
    types::chrono_duration,
    worker::{ActiveJob, Processor, StalledJobChecker},
    JobError, JobState, LeasedJob, QueueError, QueueResult, WorkerConfig,
};

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    queue_name: String,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Stop leasing new jobs and wait for in-flight ones, bounded by the
    /// configured shutdown timeout
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            task.await
                .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))?;
        }
        info!(queue = %self.queue_name, "Worker stopped");
        Ok(())
    }
}

/// Concurrent consumer for one queue
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn Processor>,
    config: WorkerConfig,
    metrics: Option<LiveMetrics>,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, processor: Arc<dyn Processor>, config: WorkerConfig) -> Self {
        Self {
            queue,
            processor,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: LiveMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Spawn the dispatcher and the stalled-job checker
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue_name = self.queue.name().to_string();

        let mut checker = StalledJobChecker::new(
            self.queue.clone(),
            self.processor.clone(),
            self.config.stalled_interval,
            self.config.max_stalled_count,
        );
        if let Some(metrics) = &self.metrics {
            checker = checker.with_metrics(metrics.clone());
        }

        let checker_task = tokio::spawn(checker.run(shutdown_rx.clone()));
        let dispatcher_task = tokio::spawn(self.run(shutdown_rx));

        info!(queue = %queue_name, "Started worker");

        WorkerHandle {
            queue_name,
            shutdown_tx,
            tasks: vec![dispatcher_task, checker_task],
        }
    }

    /// Dispatcher loop: one permit per in-flight job
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let this = Arc::new(self);

        info!(
            queue = %this.queue.name(),
            concurrency,
            lock_duration = ?this.config.lock_duration,
            "Worker dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match this.queue.lease(this.config.lock_duration).await {
                Ok(Some(leased)) => {
                    let worker = this.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        worker.run_job(leased).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    let idle = this.idle_delay();
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(idle) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(queue = %this.queue.name(), "Failed to lease job: {}", e);
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!(queue = %this.queue.name(), "Waiting for in-flight jobs to complete...");
        let drained = tokio::time::timeout(
            this.config.shutdown_timeout,
            semaphore.acquire_many(concurrency as u32),
        )
        .await;
        if drained.is_err() {
            warn!(queue = %this.queue.name(), "Shutdown timed out with jobs still running");
        }
    }

    /// Poll interval plus up to 25% jitter so idle workers do not poll in lockstep
    fn idle_delay(&self) -> Duration {
        let base = self.config.poll_interval.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=base / 4);
        Duration::from_millis(base + jitter)
    }

    /// Backoff before the next attempt, capped by `max_backoff`
    fn retry_delay(&self, leased: &LeasedJob) -> Duration {
        leased
            .record
            .opts
            .backoff
            .delay(leased.record.attempts_made)
            .min(self.config.max_backoff)
    }

    async fn run_job(&self, leased: LeasedJob) {
        let queue = self.queue.name();
        let job_id = leased.record.id.clone();
        let attempt = leased.record.attempts_made;
        let max_attempts = leased.record.max_attempts();

        info!(
            queue = %queue,
            job_id = %job_id,
            job_name = %leased.record.name,
            attempt,
            max_attempts,
            "Processing job"
        );

        let heartbeat = self.spawn_heartbeat(&leased);
        let job = ActiveJob::new(leased.record.clone(), leased.lease_token.clone(), self.queue.clone());

        let result = match AssertUnwindSafe(self.processor.process(&job)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(JobError::new("Processor panicked")),
        };
        heartbeat.abort();

        match result {
            Ok(value) => match self.queue.ack(&job_id, &leased.lease_token, value).await {
                Ok(_) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_completed(queue);
                    }
                    info!(queue = %queue, job_id = %job_id, "Job completed successfully");
                }
                Err(e) => warn!(queue = %queue, job_id = %job_id, "Failed to mark job as completed: {}", e),
            },
            Err(job_error) => {
                let retry_at = if leased.record.attempts_exhausted() {
                    None
                } else {
                    Some(Utc::now() + chrono_duration(self.retry_delay(&leased)))
                };

                let record = match self
                    .queue
                    .nack(&job_id, &leased.lease_token, job_error.to_string(), retry_at)
                    .await
                {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(queue = %queue, job_id = %job_id, "Failed to record job failure: {}", e);
                        return;
                    }
                };

                if record.state == JobState::Failed {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_failed(queue);
                    }
                    error!(
                        queue = %queue,
                        job_id = %job_id,
                        attempts_made = record.attempts_made,
                        "Job failed permanently: {}",
                        job_error
                    );
                } else {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retried(queue);
                    }
                    warn!(
                        queue = %queue,
                        job_id = %job_id,
                        attempt,
                        retry_at = %record.run_at,
                        "Job failed, will retry: {}",
                        job_error
                    );
                }

                self.processor.on_failed(&record, &job_error).await;
            }
        }
    }

    /// Renew the lease at half the lock duration until aborted
    fn spawn_heartbeat(&self, leased: &LeasedJob) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let job_id = leased.record.id.clone();
        let lease_token = leased.lease_token.clone();
        let lock_duration = self.config.lock_duration;
        let period = self.config.heartbeat_interval();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                match queue.extend_lease(&job_id, &lease_token, lock_duration).await {
                    Ok(until) => debug!(job_id = %job_id, lease_until = %until, "Lease extended"),
                    Err(e) => {
                        warn!(job_id = %job_id, "Lost lease: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::{Backoff, JobOptions};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl Processor for Echo {
        async fn process(&self, job: &ActiveJob) -> Result<Value, JobError> {
            Ok(json!({ "echo": job.record.data }))
        }
    }

    struct Panics;

    #[async_trait]
    impl Processor for Panics {
        async fn process(&self, _job: &ActiveJob) -> Result<Value, JobError> {
            panic!("boom")
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(5),
            ..WorkerConfig::default()
        }
        .with_concurrency(2)
    }

    #[tokio::test]
    async fn test_worker_completes_job() {
        let backend = Arc::new(MemoryBackend::new("default"));
        let handle = WorkerPool::new(backend.clone(), Arc::new(Echo), fast_config()).start();

        let job_id = backend.enqueue("echo", json!({"n": 1}), JobOptions::new()).await.unwrap().record.id;
        let outcome = crate::backend::wait_for_outcome(backend.as_ref(), &job_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome, crate::JobOutcome::Completed(json!({"echo": {"n": 1}})));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_processor_fails_job() {
        let backend = Arc::new(MemoryBackend::new("default"));
        let handle = WorkerPool::new(backend.clone(), Arc::new(Panics), fast_config()).start();

        let opts = JobOptions::new().with_attempts(1).with_backoff(Backoff::fixed(1));
        let job_id = backend.enqueue("boom", json!(null), opts).await.unwrap().record.id;
        let outcome = crate::backend::wait_for_outcome(backend.as_ref(), &job_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome, crate::JobOutcome::Failed("Processor panicked".to_string()));
        handle.shutdown().await.unwrap();
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let config = WorkerConfig {
            max_backoff: Duration::from_secs(5),
            ..WorkerConfig::default()
        };
        let pool = WorkerPool::new(Arc::new(MemoryBackend::new("q")), Arc::new(Echo), config);

        let mut record = crate::JobRecord::new(
            crate::JobId::new(),
            "q",
            "n",
            json!(null),
            JobOptions::new().with_attempts(10).with_backoff(Backoff::exponential(1000)),
            1,
        );
        record.attempts_made = 8;
        let leased = LeasedJob {
            record,
            lease_token: crate::LeaseToken::new(),
            lease_until: Utc::now(),
        };

        assert_eq!(pool.retry_delay(&leased), Duration::from_secs(5));
    }
}
