//! Redis-backed queue.
//!
//! Key layout per queue, under `<prefix>:<queue>:`
//!
//! - `job:<id>`   JSON-encoded [`JobRecord`]
//! - `wait`       sorted set, score = priority * 2^40 + seq
//! - `delayed`    sorted set, score = run_at millis
//! - `active`     sorted set, score = lease deadline millis
//! - `completed`  sorted set, score = finished millis
//! - `failed`     sorted set, score = finished millis
//! - `paused`     flag key
//! - `seq`        admission counter
//!
//! Lifecycle events are broadcast to subscribers in this process only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    Admission, BrokerConfig, CleanState, JobEvent, JobId, JobOptions, JobRecord, JobState,
    LeasedJob, QueueError, QueueResult, QueueStats,
    backend::{JobQueue, StalledReport, STALLED_LIMIT_REASON},
    types::{chrono_duration, LeaseToken},
};

/// Priorities above this share the lowest rank
const MAX_PRIORITY_RANK: u64 = 4095;
const SEQ_SPAN: u64 = 1 << 40;

/// Promote due delayed jobs, then pop the best waiting job into `active`.
const LEASE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  local raw = redis.call('GET', ARGV[3] .. id)
  if raw then
    local job = cjson.decode(raw)
    local prio = job['opts']['priority']
    if type(prio) ~= 'number' or prio > 4095 then prio = 4095 end
    local score = prio * 1099511627776 + (job['seq'] % 1099511627776)
    redis.call('ZADD', KEYS[1], score, id)
  end
end
if redis.call('EXISTS', KEYS[4]) == 1 then
  return false
end
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
  return false
end
redis.call('ZADD', KEYS[3], ARGV[2], popped[1])
return popped[1]
"#;

/// Open a shared connection manager for every queue of this process
pub async fn connect(config: &BrokerConfig) -> QueueResult<ConnectionManager> {
    info!(url = %config.redacted_url(), "Connecting to Redis");
    let client = redis::Client::open(config.redis_url())?;
    let conn = ConnectionManager::new(client).await?;
    info!("Successfully connected to Redis");
    Ok(conn)
}

/// One named queue stored in Redis
#[derive(Clone)]
pub struct RedisBackend {
    name: String,
    conn: ConnectionManager,
    base: String,
    lease_script: Script,
    event_broadcaster: broadcast::Sender<JobEvent>,
}

impl RedisBackend {
    pub fn new(conn: ConnectionManager, key_prefix: &str, name: impl Into<String>) -> Self {
        let name = name.into();
        let (event_broadcaster, _) = broadcast::channel(1000);

        Self {
            base: format!("{}:{}", key_prefix, name),
            name,
            conn,
            lease_script: Script::new(LEASE_SCRIPT),
            event_broadcaster,
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.base, suffix)
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.base, job_id)
    }

    fn wait_score(record: &JobRecord) -> f64 {
        let rank = record
            .opts
            .priority
            .map(|p| (p as u64).min(MAX_PRIORITY_RANK))
            .unwrap_or(MAX_PRIORITY_RANK);
        (rank * SEQ_SPAN + record.seq % SEQ_SPAN) as f64
    }

    /// Listed in `active` but never marked active by its lease
    fn is_unclaimed_lease(record: &JobRecord) -> bool {
        matches!(record.state, JobState::Waiting | JobState::Delayed)
    }

    fn millis(at: DateTime<Utc>) -> f64 {
        at.timestamp_millis() as f64
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.event_broadcaster.send(event);
    }

    async fn load(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.job_key(job_id)).await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(QueueError::from))
            .transpose()
    }

    async fn require(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        self.load(job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    /// Load an active job and verify the caller still owns its lease
    async fn load_leased(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        now: DateTime<Utc>,
    ) -> QueueResult<JobRecord> {
        let record = self.require(job_id).await?;

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

    async fn store(&self, record: &JobRecord) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(record)?;
        let _: () = conn.set(self.job_key(&record.id), raw).await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, name: &str, data: Value, opts: JobOptions) -> QueueResult<Admission> {
        let mut conn = self.conn.clone();
        let job_id = opts.job_id.clone().unwrap_or_else(JobId::new);
        let job_key = self.job_key(&job_id);

        if let Some(existing) = self.load(&job_id).await? {
            return Ok(Admission {
                record: existing,
                created: false,
            });
        }

        let seq: u64 = conn.incr(self.key("seq"), 1u64).await?;
        let record = JobRecord::new(job_id.clone(), &self.name, name, data, opts, seq);
        let raw = serde_json::to_string(&record)?;

        let created: bool = conn.set_nx(&job_key, raw).await?;
        if !created {
            let existing = self.require(&job_id).await?;
            return Ok(Admission {
                record: existing,
                created: false,
            });
        }

        let (set, score) = match record.state {
            JobState::Delayed => ("delayed", Self::millis(record.run_at)),
            _ => ("wait", Self::wait_score(&record)),
        };
        let _: () = conn.zadd(self.key(set), job_id.as_str(), score).await?;

        debug!(queue = %self.name, job_id = %job_id, "Job admitted");
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
        let mut conn = self.conn.clone();
        let now = Utc::now();
        let lease_until = now + chrono_duration(lock_duration);

        let popped: Option<String> = self
            .lease_script
            .key(self.key("wait"))
            .key(self.key("delayed"))
            .key(self.key("active"))
            .key(self.key("paused"))
            .arg(now.timestamp_millis())
            .arg(lease_until.timestamp_millis())
            .arg(format!("{}:job:", self.base))
            .invoke_async(&mut conn)
            .await?;

        let Some(job_id) = popped.map(JobId::from) else {
            return Ok(None);
        };

        let Some(mut record) = self.load(&job_id).await? else {
            let _: () = conn.zrem(self.key("active"), job_id.as_str()).await?;
            return Ok(None);
        };

        let lease_token = LeaseToken::new();
        record.start_processing(lease_token.clone(), lease_until);
        self.store(&record).await?;

        self.emit(JobEvent::Active {
            queue: self.name.clone(),
            job_id,
            attempts_made: record.attempts_made,
            at: now,
        });

        Ok(Some(LeasedJob {
            record,
            lease_token,
            lease_until,
        }))
    }

    async fn extend_lease(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        lock_duration: Duration,
    ) -> QueueResult<DateTime<Utc>> {
        let now = Utc::now();
        let mut record = self.load_leased(job_id, lease_token, now).await?;
        let lease_until = now + chrono_duration(lock_duration);
        record.lease_until = Some(lease_until);

        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(&record)?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.job_key(job_id), raw)
            .ignore()
            .zadd(self.key("active"), job_id.as_str(), Self::millis(lease_until))
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(lease_until)
    }

    async fn update_progress(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        progress: u8,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let mut record = self.load_leased(job_id, lease_token, now).await?;
        record.progress = progress.min(100);
        self.store(&record).await?;

        self.emit(JobEvent::Progress {
            queue: self.name.clone(),
            job_id: job_id.clone(),
            progress: record.progress,
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
        let mut record = self.load_leased(job_id, lease_token, now).await?;
        record.complete(return_value);

        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(&record)?;
        let finished = Self::millis(record.finished_on.unwrap_or(now));
        let _: () = redis::pipe()
            .atomic()
            .set(self.job_key(job_id), raw)
            .ignore()
            .zrem(self.key("active"), job_id.as_str())
            .ignore()
            .zadd(self.key("completed"), job_id.as_str(), finished)
            .ignore()
            .query_async(&mut conn)
            .await?;

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
        let mut record = self.load_leased(job_id, lease_token, now).await?;

        match retry_at {
            Some(run_at) if !record.attempts_exhausted() => {
                record.schedule_retry(run_at, error.clone())
            }
            _ => record.fail(error.clone()),
        }

        let (target, score) = match record.state {
            JobState::Delayed => ("delayed", Self::millis(record.run_at)),
            _ => ("failed", Self::millis(record.finished_on.unwrap_or(now))),
        };

        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(&record)?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.job_key(job_id), raw)
            .ignore()
            .zrem(self.key("active"), job_id.as_str())
            .ignore()
            .zadd(self.key(target), job_id.as_str(), score)
            .ignore()
            .query_async(&mut conn)
            .await?;

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
        let mut conn = self.conn.clone();
        let now = Utc::now();
        let mut report = StalledReport::default();

        let expired: Vec<String> = conn
            .zrangebyscore(self.key("active"), "-inf", now.timestamp_millis())
            .await?;

        for id in expired {
            let job_id = JobId::from(id);

            // Another process may already have claimed this job
            let claimed: i64 = conn.zrem(self.key("active"), job_id.as_str()).await?;
            if claimed == 0 {
                continue;
            }

            let Some(mut record) = self.load(&job_id).await? else {
                continue;
            };
            if Self::is_unclaimed_lease(&record) {
                // Popped by a lease that died before recording its claim
                record.state = JobState::Waiting;
                self.store(&record).await?;
                let _: () = conn
                    .zadd(self.key("wait"), job_id.as_str(), Self::wait_score(&record))
                    .await?;
                warn!(queue = %self.name, job_id = %job_id, "Restored job orphaned by an interrupted lease");
                continue;
            }
            if record.state != JobState::Active {
                continue;
            }

            if record.stalled_count + 1 > max_stalled_count {
                record.stalled_count += 1;
                record.fail(STALLED_LIMIT_REASON.to_string());
                let finished = Self::millis(record.finished_on.unwrap_or(now));
                self.store(&record).await?;
                let _: () = conn.zadd(self.key("failed"), job_id.as_str(), finished).await?;

                self.emit(JobEvent::Failed {
                    queue: self.name.clone(),
                    job_id: job_id.clone(),
                    error: STALLED_LIMIT_REASON.to_string(),
                    at: now,
                });
                report.failed.push(record);
            } else {
                record.release_stalled();
                self.store(&record).await?;
                let _: () = conn
                    .zadd(self.key("wait"), job_id.as_str(), Self::wait_score(&record))
                    .await?;

                self.emit(JobEvent::Stalled {
                    queue: self.name.clone(),
                    job_id: job_id.clone(),
                    at: now,
                });
                report.requeued.push(job_id);
            }
        }

        Ok(report)
    }

    async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let Some(mut record) = self.load(job_id).await? else {
            return Ok(None);
        };

        // Promotion happens inside the lease script without rewriting the record
        if record.state == JobState::Delayed {
            let mut conn = self.conn.clone();
            let score: Option<f64> = conn.zscore(self.key("wait"), job_id.as_str()).await?;
            if score.is_some() {
                record.state = JobState::Waiting;
            }
        }
        Ok(Some(record))
    }

    async fn get_failed(&self, start: usize, end: usize) -> QueueResult<Vec<JobRecord>> {
        if start > end {
            return Ok(Vec::new());
        }

        // Redis reads negative indexes from the tail
        let start = isize::try_from(start).unwrap_or(isize::MAX);
        let end = isize::try_from(end).unwrap_or(isize::MAX);

        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrevrange(self.key("failed"), start, end)
            .await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load(&JobId::from(id)).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn retry_job(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        let mut record = self.require(job_id).await?;
        if record.state != JobState::Failed {
            return Err(QueueError::JobNotFailed(job_id.to_string()));
        }

        let mut conn = self.conn.clone();
        let seq: u64 = conn.incr(self.key("seq"), 1u64).await?;
        record.reset_for_retry(seq);

        let raw = serde_json::to_string(&record)?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.job_key(job_id), raw)
            .ignore()
            .zrem(self.key("failed"), job_id.as_str())
            .ignore()
            .zadd(self.key("wait"), job_id.as_str(), Self::wait_score(&record))
            .ignore()
            .query_async(&mut conn)
            .await?;

        self.emit(JobEvent::Added {
            queue: self.name.clone(),
            job_id: job_id.clone(),
            name: record.name.clone(),
            at: Utc::now(),
        });
        Ok(record)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.conn.clone();
        let (waiting, active, completed, failed, delayed, paused): (u64, u64, u64, u64, u64, bool) =
            redis::pipe()
                .zcard(self.key("wait"))
                .zcard(self.key("active"))
                .zcard(self.key("completed"))
                .zcard(self.key("failed"))
                .zcard(self.key("delayed"))
                .exists(self.key("paused"))
                .query_async(&mut conn)
                .await?;

        let mut stats = QueueStats {
            queue_name: self.name.clone(),
            waiting,
            active,
            completed,
            failed,
            delayed,
            paused: 0,
        };
        if paused {
            stats.paused = stats.waiting;
            stats.waiting = 0;
        }
        Ok(stats)
    }

    async fn pause(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.key("paused"), 1).await?;
        self.emit(JobEvent::Paused {
            queue: self.name.clone(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn resume(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key("paused")).await?;
        self.emit(JobEvent::Resumed {
            queue: self.name.clone(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn is_paused(&self) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let paused: bool = conn.exists(self.key("paused")).await?;
        Ok(paused)
    }

    async fn clean(&self, grace: Duration, limit: usize, state: CleanState) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn.clone();
        let now = Utc::now();
        let cutoff = (now - chrono_duration(grace)).timestamp_millis();
        let set = self.key(state.job_state().name());

        let ids: Vec<String> = if limit > 0 {
            conn.zrangebyscore_limit(&set, "-inf", cutoff, 0, limit as isize).await?
        } else {
            conn.zrangebyscore(&set, "-inf", cutoff).await?
        };

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            let job_id = JobId::from(id);
            let _: () = redis::pipe()
                .atomic()
                .del(self.job_key(&job_id))
                .ignore()
                .zrem(&set, job_id.as_str())
                .ignore()
                .query_async(&mut conn)
                .await?;

            self.emit(JobEvent::Removed {
                queue: self.name.clone(),
                job_id: job_id.clone(),
                at: now,
            });
            removed.push(job_id);
        }
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_broadcaster.subscribe()
    }
}
