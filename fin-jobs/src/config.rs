use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use fin_queue::{BrokerConfig, WorkerConfig};

use crate::queues::QueueName;

/// Which queue store backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Redis,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("Unknown queue backend: {}", other)),
        }
    }
}

/// Process-wide settings, read from the environment
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: BackendKind,
    pub broker: BrokerConfig,
    /// Shared worker settings; concurrency is replaced per queue
    pub worker: WorkerConfig,
    pub concurrency: BTreeMap<QueueName, usize>,
    pub dashboard_enabled: bool,
    pub dashboard_path: String,
    pub http_host: String,
    pub http_port: u16,
    pub webhook_timeout: Duration,
    pub log_json: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EngineConfig {
    /// Load `.env` if present, then read the process environment
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Malformed values fall back to their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let broker_defaults = BrokerConfig::default();
        let broker = BrokerConfig {
            host: get("REDIS_HOST", &broker_defaults.host),
            port: parse_or(&lookup, "REDIS_PORT", broker_defaults.port),
            password: lookup("REDIS_PASSWORD").filter(|p| !p.is_empty()),
            db: parse_or(&lookup, "REDIS_DB", broker_defaults.db),
            key_prefix: get("QUEUE_KEY_PREFIX", &broker_defaults.key_prefix),
        };

        let worker_defaults = WorkerConfig::default();
        let millis = |key: &str, default: Duration| {
            Duration::from_millis(parse_or(&lookup, key, default.as_millis() as u64))
        };
        let worker = WorkerConfig {
            lock_duration: millis("QUEUE_LOCK_DURATION_MS", worker_defaults.lock_duration),
            stalled_interval: millis("QUEUE_STALLED_INTERVAL_MS", worker_defaults.stalled_interval),
            max_stalled_count: parse_or(&lookup, "QUEUE_MAX_STALLED_COUNT", worker_defaults.max_stalled_count),
            poll_interval: millis("QUEUE_POLL_INTERVAL_MS", worker_defaults.poll_interval),
            max_backoff: millis("QUEUE_MAX_BACKOFF_MS", worker_defaults.max_backoff),
            ..worker_defaults
        };

        let concurrency = QueueName::ALL
            .into_iter()
            .map(|queue| {
                let key = format!("QUEUE_{}_CONCURRENCY", queue.env_key());
                (queue, parse_or(&lookup, &key, queue.default_concurrency()).max(1))
            })
            .collect();

        Self {
            backend: parse_or(&lookup, "QUEUE_BACKEND", BackendKind::Memory),
            broker,
            worker,
            concurrency,
            dashboard_enabled: parse_or(&lookup, "QUEUE_DASHBOARD_ENABLED", true),
            dashboard_path: get("QUEUE_DASHBOARD_PATH", "/queue-dashboard"),
            http_host: get("HTTP_HOST", "127.0.0.1"),
            http_port: parse_or(&lookup, "HTTP_PORT", 3030),
            webhook_timeout: millis("WEBHOOK_TIMEOUT_MS", Duration::from_secs(10)),
            log_json: get("LOG_FORMAT", "pretty").eq_ignore_ascii_case("json"),
        }
    }

    /// Worker settings for one queue
    pub fn worker_config(&self, queue: QueueName) -> WorkerConfig {
        let concurrency = self
            .concurrency
            .get(&queue)
            .copied()
            .unwrap_or_else(|| queue.default_concurrency());
        self.worker.clone().with_concurrency(concurrency)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!(key, value = %raw, "Invalid configuration value, using default: {}", e);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tracing_test::traced_test;

    fn config(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_queue_roles() {
        let config = config(&[]);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.worker_config(QueueName::WebhookDispatch).concurrency, 20);
        assert_eq!(config.worker_config(QueueName::DeadLetter).concurrency, 1);
        assert_eq!(config.dashboard_path, "/queue-dashboard");
        assert_eq!(config.http_addr(), "127.0.0.1:3030");
        assert!(!config.log_json);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("QUEUE_BACKEND", "redis"),
            ("REDIS_PORT", "6380"),
            ("QUEUE_FRAUD_SCORING_CONCURRENCY", "3"),
            ("QUEUE_LOCK_DURATION_MS", "5000"),
            ("QUEUE_DASHBOARD_ENABLED", "false"),
            ("LOG_FORMAT", "json"),
        ]);

        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.broker.port, 6380);
        assert_eq!(config.worker_config(QueueName::FraudScoring).concurrency, 3);
        assert_eq!(config.worker.lock_duration, Duration::from_secs(5));
        assert!(!config.dashboard_enabled);
        assert!(config.log_json);
    }

    #[test]
    #[traced_test]
    fn malformed_values_fall_back() {
        let config = config(&[("HTTP_PORT", "eighty"), ("QUEUE_RETRY_JOBS_CONCURRENCY", "0")]);

        assert_eq!(config.http_port, 3030);
        assert_eq!(config.worker_config(QueueName::RetryJobs).concurrency, 1);
        assert!(logs_contain("Invalid configuration value"));
    }
}
