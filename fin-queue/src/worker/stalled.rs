use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::{
    backend::{JobQueue, StalledReport, STALLED_LIMIT_REASON},
    observability::LiveMetrics,
    worker::Processor,
    JobError, QueueResult,
};

/// Periodically reclaims jobs whose lease expired because their worker died
pub struct StalledJobChecker {
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn Processor>,
    interval: Duration,
    max_stalled_count: u32,
    metrics: Option<LiveMetrics>,
}

impl StalledJobChecker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn Processor>,
        interval: Duration,
        max_stalled_count: u32,
    ) -> Self {
        Self {
            queue,
            processor,
            interval,
            max_stalled_count,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: LiveMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);

        info!(queue = %self.queue.name(), interval = ?self.interval, "Starting stalled job checker");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    match self.check_once().await {
                        Ok(report) if !report.is_empty() => {
                            info!(
                                queue = %self.queue.name(),
                                requeued = report.requeued.len(),
                                failed = report.failed.len(),
                                "Reclaimed stalled jobs"
                            );
                        }
                        Ok(_) => debug!(queue = %self.queue.name(), "No stalled jobs found"),
                        Err(e) => warn!(queue = %self.queue.name(), "Error during stalled check: {}", e),
                    }
                }
            }
        }
    }

    /// Run one sweep
    pub async fn check_once(&self) -> QueueResult<StalledReport> {
        let report = self.queue.reclaim_stalled(self.max_stalled_count).await?;
        let queue = self.queue.name();

        if let Some(metrics) = &self.metrics {
            metrics.record_stalled(queue, report.requeued.len() as u64);
        }

        for job_id in &report.requeued {
            warn!(queue = %queue, job_id = %job_id, "Job stalled, returned to waiting");
        }

        let error = JobError::new(STALLED_LIMIT_REASON);
        for record in &report.failed {
            warn!(queue = %queue, job_id = %record.id, "Job stalled too many times, failing");
            if let Some(metrics) = &self.metrics {
                metrics.record_failed(queue);
            }
            self.processor.on_failed(record, &error).await;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::worker::ActiveJob;
    use crate::{JobOptions, JobRecord, JobState};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recorder {
        failed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Processor for Recorder {
        async fn process(&self, _job: &ActiveJob) -> Result<Value, JobError> {
            Ok(Value::Null)
        }

        async fn on_failed(&self, job: &JobRecord, error: &JobError) {
            self.failed.lock().push(format!("{}: {}", job.id, error));
        }
    }

    const LOCK: Duration = Duration::from_secs(30);

    #[tokio::test]
    #[traced_test]
    async fn test_stalled_job_requeued_without_consuming_attempt() {
        let backend = Arc::new(MemoryBackend::new("default"));
        let checker = StalledJobChecker::new(backend.clone(), Arc::new(Recorder::default()), LOCK, 1);

        let job_id = backend
            .enqueue("test", json!(null), JobOptions::new().with_attempts(3))
            .await
            .unwrap()
            .record
            .id;
        backend.lease(LOCK).await.unwrap().unwrap();
        backend.force_lease_expiry(&job_id).await.unwrap();

        let report = checker.check_once().await.unwrap();
        assert_eq!(report.requeued, vec![job_id.clone()]);
        assert!(logs_contain("Job stalled, returned to waiting"));

        let leased = backend.lease(LOCK).await.unwrap().unwrap();
        assert_eq!(leased.record.attempts_made, 1);
        assert_eq!(leased.record.stalled_count, 1);
    }

    #[tokio::test]
    async fn test_stall_limit_fails_job_and_notifies() {
        let backend = Arc::new(MemoryBackend::new("default"));
        let recorder = Arc::new(Recorder::default());
        let checker = StalledJobChecker::new(backend.clone(), recorder.clone(), LOCK, 1);

        let job_id = backend.enqueue("test", json!(null), JobOptions::new()).await.unwrap().record.id;

        for _ in 0..2 {
            backend.lease(LOCK).await.unwrap().unwrap();
            backend.force_lease_expiry(&job_id).await.unwrap();
            checker.check_once().await.unwrap();
        }

        let record = backend.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.failed_reason.as_deref(), Some(STALLED_LIMIT_REASON));
        assert_eq!(recorder.failed.lock().len(), 1);
    }
}
