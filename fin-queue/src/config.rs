use std::time::Duration;

/// Runtime settings for one queue's worker pool
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of jobs processed at once
    pub concurrency: usize,
    /// Lease duration for jobs; heartbeats renew it at half this interval
    pub lock_duration: Duration,
    /// How often the stalled-job checker runs
    pub stalled_interval: Duration,
    /// Stalls tolerated before a job is failed
    pub max_stalled_count: u32,
    /// Idle sleep between empty lease attempts
    pub poll_interval: Duration,
    /// Upper bound on any single retry backoff
    pub max_backoff: Duration,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            lock_duration: Duration::from_secs(30),
            stalled_interval: Duration::from_secs(30),
            max_stalled_count: 1,
            poll_interval: Duration::from_millis(100),
            max_backoff: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Heartbeat period for lease renewal
    pub fn heartbeat_interval(&self) -> Duration {
        (self.lock_duration / 2).max(Duration::from_millis(10))
    }
}

/// Connection settings for the shared Redis broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
    /// Namespace for every key this process writes
    pub key_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            key_prefix: "fin".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn redis_url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Same URL with the password masked, for logs
    pub fn redacted_url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(_) => format!("redis://:****@{}:{}/{}", self.host, self.port, self.db),
            None => self.redis_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_includes_password_and_db() {
        let config = BrokerConfig {
            password: Some("s3cret".into()),
            db: 2,
            ..BrokerConfig::default()
        };
        assert_eq!(config.redis_url(), "redis://:s3cret@127.0.0.1:6379/2");
        assert_eq!(config.redacted_url(), "redis://:****@127.0.0.1:6379/2");
    }

    #[test]
    fn heartbeat_is_half_the_lock() {
        let config = WorkerConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
    }
}
