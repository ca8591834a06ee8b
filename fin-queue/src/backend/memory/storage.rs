use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    Admission, CleanState, JobEvent, JobId, JobOptions, JobRecord, JobState, LeasedJob,
    QueueError, QueueResult, QueueStats,
    backend::{JobQueue, StalledReport, STALLED_LIMIT_REASON},
    types::{chrono_duration, LeaseToken},
};

/// Waiting set key: (priority rank, admission seq)
type WaitKey = (u32, u64);

/// Delayed set key: (run_at, admission seq)
type DelayKey = (DateTime<Utc>, u64);

#[derive(Default)]
pub(crate) struct QueueState {
    pub(crate) jobs: HashMap<JobId, JobRecord>,
    waiting: BTreeMap<WaitKey, JobId>,
    delayed: BTreeMap<DelayKey, JobId>,
    paused: bool,
    seq: u64,
}

impl QueueState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn push_waiting(&mut self, record: &JobRecord) {
        self.waiting
            .insert((record.opts.priority_rank(), record.seq), record.id.clone());
    }

    fn push_delayed(&mut self, record: &JobRecord) {
        self.delayed.insert((record.run_at, record.seq), record.id.clone());
    }

    /// Move every delayed job whose `run_at` has passed into the waiting set
    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some((&(run_at, seq), _)) = self.delayed.first_key_value() {
            if run_at > now {
                break;
            }
            let Some(job_id) = self.delayed.remove(&(run_at, seq)) else {
                break;
            };
            if let Some(record) = self.jobs.get_mut(&job_id) {
                record.state = JobState::Waiting;
                let key = (record.opts.priority_rank(), record.seq);
                self.waiting.insert(key, job_id);
            }
        }
    }

    /// Look up an active job and verify the caller still owns its lease
    fn leased_mut(
        &mut self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        now: DateTime<Utc>,
    ) -> QueueResult<&mut JobRecord> {
        let record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if record.state.is_terminal() {
            return Err(QueueError::JobAlreadyTerminal);
        }

        if record.lease_token.as_ref() != Some(lease_token) {
            return Err(QueueError::InvalidLeaseToken);
        }

        if record.lease_expired(now) {
            return Err(QueueError::LeaseExpired);
        }

        Ok(record)
    }
}

/// In-memory queue for tests, development and single-process deployments
#[derive(Clone)]
pub struct MemoryBackend {
    name: String,

    pub(crate) state: Arc<RwLock<QueueState>>,

    /// Event broadcaster for observability
    pub(crate) event_broadcaster: broadcast::Sender<JobEvent>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        let (event_broadcaster, _) = broadcast::channel(1000);

        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(QueueState::default())),
            event_broadcaster,
        }
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.event_broadcaster.send(event);
    }

    /// Force a lease to expire (test helper)
    pub async fn force_lease_expiry(&self, job_id: &JobId) -> QueueResult<()> {
        let mut state = self.state.write();
        let record = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        if record.state == JobState::Active {
            record.lease_until = Some(Utc::now() - chrono::Duration::seconds(1));
        }
        Ok(())
    }

    /// Make a delayed job due immediately (test helper)
    pub async fn promote_now(&self, job_id: &JobId) -> QueueResult<()> {
        let mut state = self.state.write();
        let key = state
            .delayed
            .iter()
            .find(|(_, id)| *id == job_id)
            .map(|(key, _)| *key);
        if let Some(key) = key {
            state.delayed.remove(&key);
            let now = Utc::now();
            if let Some(record) = state.jobs.get_mut(job_id) {
                record.run_at = now;
            }
            state.delayed.insert((now, key.1), job_id.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, name: &str, data: Value, opts: JobOptions) -> QueueResult<Admission> {
        let job_id = opts.job_id.clone().unwrap_or_else(JobId::new);

        let record = {
            let mut state = self.state.write();

            if let Some(existing) = state.jobs.get(&job_id) {
                return Ok(Admission {
                    record: existing.clone(),
                    created: false,
                });
            }

            let seq = state.next_seq();
            let record = JobRecord::new(job_id.clone(), &self.name, name, data, opts, seq);
            match record.state {
                JobState::Delayed => state.push_delayed(&record),
                _ => state.push_waiting(&record),
            }
            state.jobs.insert(job_id.clone(), record.clone());
            record
        };

        self.emit(JobEvent::Added {
            queue: self.name.clone(),
            job_id,
            name: name.to_string(),
            at: record.created_at,
        });

        Ok(Admission {
            record,
            created: true,
        })
    }

    async fn lease(&self, lock_duration: Duration) -> QueueResult<Option<LeasedJob>> {
        let now = Utc::now();

        let leased = {
            let mut state = self.state.write();
            state.promote_due(now);

            if state.paused {
                return Ok(None);
            }

            let Some((_, job_id)) = state.waiting.pop_first() else {
                return Ok(None);
            };

            let record = state
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| QueueError::Internal(format!("Waiting job {} has no record", job_id)))?;

            let lease_token = LeaseToken::new();
            let lease_until = now + chrono_duration(lock_duration);
            record.start_processing(lease_token.clone(), lease_until);

            LeasedJob {
                record: record.clone(),
                lease_token,
                lease_until,
            }
        };

        self.emit(JobEvent::Active {
            queue: self.name.clone(),
            job_id: leased.record.id.clone(),
            attempts_made: leased.record.attempts_made,
            at: now,
        });

        Ok(Some(leased))
    }

    async fn extend_lease(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        lock_duration: Duration,
    ) -> QueueResult<DateTime<Utc>> {
        let now = Utc::now();
        let mut state = self.state.write();
        let record = state.leased_mut(job_id, lease_token, now)?;

        let lease_until = now + chrono_duration(lock_duration);
        record.lease_until = Some(lease_until);
        Ok(lease_until)
    }

    async fn update_progress(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        progress: u8,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let progress = progress.min(100);
        {
            let mut state = self.state.write();
            let record = state.leased_mut(job_id, lease_token, now)?;
            record.progress = progress;
        }

        self.emit(JobEvent::Progress {
            queue: self.name.clone(),
            job_id: job_id.clone(),
            progress,
            at: now,
        });
        Ok(())
    }

    async fn ack(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        return_value: Value,
    ) -> QueueResult<JobRecord> {
        let now = Utc::now();
        let record = {
            let mut state = self.state.write();
            let record = state.leased_mut(job_id, lease_token, now)?;
            record.complete(return_value);
            record.clone()
        };

        self.emit(JobEvent::Completed {
            queue: self.name.clone(),
            job_id: job_id.clone(),
            at: now,
        });
        Ok(record)
    }

    async fn nack(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<JobRecord> {
        let now = Utc::now();
        let record = {
            let mut state = self.state.write();
            let record = state.leased_mut(job_id, lease_token, now)?;

            match retry_at {
                Some(run_at) if !record.attempts_exhausted() => {
                    record.schedule_retry(run_at, error.clone());
                }
                _ => record.fail(error.clone()),
            }

            let record = record.clone();
            if record.state == JobState::Delayed {
                state.push_delayed(&record);
            }
            record
        };

        let event = match record.state {
            JobState::Delayed => JobEvent::Retrying {
                queue: self.name.clone(),
                job_id: job_id.clone(),
                run_at: record.run_at,
                error,
                at: now,
            },
            _ => JobEvent::Failed {
                queue: self.name.clone(),
                job_id: job_id.clone(),
                error,
                at: now,
            },
        };
        self.emit(event);

        Ok(record)
    }

    async fn reclaim_stalled(&self, max_stalled_count: u32) -> QueueResult<StalledReport> {
        let now = Utc::now();
        let mut report = StalledReport::default();

        {
            let mut state = self.state.write();
            let expired: Vec<JobId> = state
                .jobs
                .values()
                .filter(|record| record.lease_expired(now))
                .map(|record| record.id.clone())
                .collect();

            for job_id in expired {
                let Some(record) = state.jobs.get_mut(&job_id) else {
                    continue;
                };

                if record.stalled_count + 1 > max_stalled_count {
                    record.stalled_count += 1;
                    record.fail(STALLED_LIMIT_REASON.to_string());
                    report.failed.push(record.clone());
                } else {
                    record.release_stalled();
                    let record = record.clone();
                    state.push_waiting(&record);
                    report.requeued.push(job_id);
                }
            }
        }

        for job_id in &report.requeued {
            self.emit(JobEvent::Stalled {
                queue: self.name.clone(),
                job_id: job_id.clone(),
                at: now,
            });
        }
        for record in &report.failed {
            self.emit(JobEvent::Failed {
                queue: self.name.clone(),
                job_id: record.id.clone(),
                error: STALLED_LIMIT_REASON.to_string(),
                at: now,
            });
        }

        Ok(report)
    }

    async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.state.read().jobs.get(job_id).cloned())
    }

    async fn get_failed(&self, start: usize, end: usize) -> QueueResult<Vec<JobRecord>> {
        let mut failed: Vec<JobRecord> = self
            .state
            .read()
            .jobs
            .values()
            .filter(|record| record.state == JobState::Failed)
            .cloned()
            .collect();

        failed.sort_by(|a, b| b.finished_on.cmp(&a.finished_on).then(b.seq.cmp(&a.seq)));

        if start > end {
            return Ok(Vec::new());
        }
        Ok(failed
            .into_iter()
            .skip(start)
            .take(end.saturating_sub(start).saturating_add(1))
            .collect())
    }

    async fn retry_job(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        let record = {
            let mut state = self.state.write();
            let seq = state.next_seq();
            let record = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

            if record.state != JobState::Failed {
                return Err(QueueError::JobNotFailed(job_id.to_string()));
            }

            record.reset_for_retry(seq);
            let record = record.clone();
            state.push_waiting(&record);
            record
        };

        self.emit(JobEvent::Added {
            queue: self.name.clone(),
            job_id: job_id.clone(),
            name: record.name.clone(),
            at: Utc::now(),
        });
        Ok(record)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let state = self.state.read();
        let mut stats = QueueStats::empty(&self.name);

        for record in state.jobs.values() {
            match record.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Delayed => stats.delayed += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }

        if state.paused {
            stats.paused = stats.waiting;
            stats.waiting = 0;
        }
        Ok(stats)
    }

    async fn pause(&self) -> QueueResult<()> {
        self.state.write().paused = true;
        self.emit(JobEvent::Paused {
            queue: self.name.clone(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn resume(&self) -> QueueResult<()> {
        self.state.write().paused = false;
        self.emit(JobEvent::Resumed {
            queue: self.name.clone(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn is_paused(&self) -> QueueResult<bool> {
        Ok(self.state.read().paused)
    }

    async fn clean(&self, grace: Duration, limit: usize, state: CleanState) -> QueueResult<Vec<JobId>> {
        let now = Utc::now();
        let cutoff = now - chrono_duration(grace);
        let target = state.job_state();

        let removed = {
            let mut queue = self.state.write();
            let mut candidates: Vec<(DateTime<Utc>, JobId)> = queue
                .jobs
                .values()
                .filter(|record| record.state == target)
                .filter_map(|record| record.finished_on.map(|at| (at, record.id.clone())))
                .filter(|(finished_on, _)| *finished_on <= cutoff)
                .collect();

            candidates.sort();
            if limit > 0 {
                candidates.truncate(limit);
            }

            for (_, job_id) in &candidates {
                queue.jobs.remove(job_id);
            }
            candidates.into_iter().map(|(_, job_id)| job_id).collect::<Vec<_>>()
        };

        for job_id in &removed {
            self.emit(JobEvent::Removed {
                queue: self.name.clone(),
                job_id: job_id.clone(),
                at: now,
            });
        }
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_broadcaster.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    const LOCK: Duration = Duration::from_secs(30);

    fn keyed(key: &str) -> JobOptions {
        JobOptions::new().with_job_id(JobId::for_key("test-job", key))
    }

    #[tokio::test]
    async fn test_enqueue_lease() {
        let backend = MemoryBackend::new("default");

        let admission = backend.enqueue("test-job", json!({"n": 1}), JobOptions::new()).await.unwrap();
        assert!(admission.created);

        let leased = backend.lease(LOCK).await.unwrap().unwrap();
        assert_eq!(leased.record.id, admission.record.id);
        assert_eq!(leased.record.attempts_made, 1);
        assert_eq!(leased.record.state, JobState::Active);
    }

    #[tokio::test]
    async fn test_idempotent_admission() {
        let backend = MemoryBackend::new("default");

        let first = backend.enqueue("test-job", json!({"v": 1}), keyed("k1")).await.unwrap();
        let second = backend.enqueue("test-job", json!({"v": 2}), keyed("k1")).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.record.data, json!({"v": 1}));
        assert_eq!(backend.stats().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let backend = MemoryBackend::new("default");

        let plain = backend.enqueue("a", json!(null), JobOptions::new()).await.unwrap();
        let low = backend.enqueue("b", json!(null), JobOptions::new().with_priority(5)).await.unwrap();
        let high_1 = backend.enqueue("c", json!(null), JobOptions::new().with_priority(1)).await.unwrap();
        let high_2 = backend.enqueue("d", json!(null), JobOptions::new().with_priority(1)).await.unwrap();

        let mut order = Vec::new();
        while let Some(leased) = backend.lease(LOCK).await.unwrap() {
            order.push(leased.record.id);
        }

        assert_eq!(
            order,
            vec![high_1.record.id, high_2.record.id, low.record.id, plain.record.id]
        );
    }

    #[tokio::test]
    async fn test_paused_queue_leases_nothing() {
        let backend = MemoryBackend::new("default");
        backend.enqueue("a", json!(null), JobOptions::new()).await.unwrap();
        backend.pause().await.unwrap();

        assert!(backend.lease(LOCK).await.unwrap().is_none());
        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.paused, 1);

        backend.resume().await.unwrap();
        assert!(backend.lease(LOCK).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_nack_schedules_retry_until_exhausted() {
        let backend = MemoryBackend::new("default");
        let opts = JobOptions::new().with_attempts(2);
        let job_id = backend.enqueue("a", json!(null), opts).await.unwrap().record.id;

        let leased = backend.lease(LOCK).await.unwrap().unwrap();
        let record = backend
            .nack(&job_id, &leased.lease_token, "boom".into(), Some(Utc::now()))
            .await
            .unwrap();
        assert_eq!(record.state, JobState::Delayed);

        let leased = backend.lease(LOCK).await.unwrap().unwrap();
        assert_eq!(leased.record.attempts_made, 2);
        let record = backend
            .nack(&job_id, &leased.lease_token, "boom again".into(), Some(Utc::now()))
            .await
            .unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.failed_reason.as_deref(), Some("boom again"));
    }

    #[tokio::test]
    async fn test_ack_with_stale_token_rejected() {
        let backend = MemoryBackend::new("default");
        let job_id = backend.enqueue("a", json!(null), JobOptions::new()).await.unwrap().record.id;
        let leased = backend.lease(LOCK).await.unwrap().unwrap();

        let result = backend.ack(&job_id, &LeaseToken::new(), json!(null)).await;
        assert_eq!(assert_err!(result), QueueError::InvalidLeaseToken);

        assert_ok!(backend.ack(&job_id, &leased.lease_token, json!("ok")).await);
        let result = backend.ack(&job_id, &leased.lease_token, json!("ok")).await;
        assert_eq!(result.unwrap_err(), QueueError::JobAlreadyTerminal);
    }

    #[tokio::test]
    async fn test_retry_job_requires_failed_state() {
        let backend = MemoryBackend::new("default");
        let job_id = backend.enqueue("a", json!(null), JobOptions::new()).await.unwrap().record.id;

        let err = backend.retry_job(&job_id).await.unwrap_err();
        assert_eq!(err, QueueError::JobNotFailed(job_id.to_string()));

        let err = backend.retry_job(&JobId::from("missing")).await.unwrap_err();
        assert_eq!(err, QueueError::JobNotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn test_clean_respects_limit() {
        let backend = MemoryBackend::new("default");
        for _ in 0..3 {
            backend.enqueue("a", json!(null), JobOptions::new()).await.unwrap();
            let leased = backend.lease(LOCK).await.unwrap().unwrap();
            backend.ack(leased.job_id(), &leased.lease_token, json!(null)).await.unwrap();
        }

        let removed = backend.clean(Duration::ZERO, 2, CleanState::Completed).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(backend.stats().await.unwrap().completed, 1);

        let removed = backend.clean(Duration::ZERO, 0, CleanState::Failed).await.unwrap();
        assert!(removed.is_empty());
    }
}
