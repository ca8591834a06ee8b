//! Process bootstrap: queues, service, processors and worker pools.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use fin_queue::{LiveMetrics, MemoryBackend, Processor, QueueRegistry, WorkerHandle, WorkerPool};

use crate::config::{BackendKind, EngineConfig};
use crate::processors::{
    DeadLetterProcessor, FraudScoringProcessor, InMemoryReconciliationSource, LoggingRetryActions,
    ReconciliationProcessor, ReconciliationSource, RetryActions, RetryJobsProcessor,
    WebhookDispatchProcessor,
};
use crate::queues::QueueName;
use crate::service::QueueService;

/// Pluggable collaborators for the processors
pub struct EngineComponents {
    pub retry_actions: Arc<dyn RetryActions>,
    pub reconciliation_source: Arc<dyn ReconciliationSource>,
    /// Client for webhook delivery; built from the configured timeout when absent
    pub http_client: Option<reqwest::Client>,
}

impl Default for EngineComponents {
    fn default() -> Self {
        Self {
            retry_actions: Arc::new(LoggingRetryActions),
            reconciliation_source: Arc::new(InMemoryReconciliationSource::new()),
            http_client: None,
        }
    }
}

/// Running job engine: one worker pool per queue
pub struct JobEngine {
    service: QueueService,
    worker_handles: Vec<WorkerHandle>,
}

impl JobEngine {
    /// Start with the default collaborators
    pub async fn start(config: &EngineConfig) -> Result<Self> {
        Self::start_with(config, EngineComponents::default()).await
    }

    /// Build every queue, resume any left paused, then start the pools
    pub async fn start_with(config: &EngineConfig, components: EngineComponents) -> Result<Self> {
        let registry = build_registry(config).await?;
        let metrics = LiveMetrics::new();
        let service = QueueService::new(registry, metrics.clone());

        let resumed = service
            .resume_paused_queues()
            .await
            .context("Failed to resume paused queues")?;
        if !resumed.is_empty() {
            info!(queues = ?resumed, "Resumed queues left paused by a previous run");
        }

        let http_client = match components.http_client {
            Some(client) => client,
            None => WebhookDispatchProcessor::client_with_timeout(config.webhook_timeout)?,
        };

        let mut worker_handles = Vec::with_capacity(QueueName::ALL.len());
        for queue_name in QueueName::ALL {
            let processor: Arc<dyn Processor> = match queue_name {
                QueueName::RetryJobs => Arc::new(RetryJobsProcessor::new(
                    components.retry_actions.clone(),
                    service.clone(),
                )),
                QueueName::Reconciliation => Arc::new(ReconciliationProcessor::new(
                    components.reconciliation_source.clone(),
                    service.clone(),
                )),
                QueueName::FraudScoring => Arc::new(FraudScoringProcessor::new(service.clone())),
                QueueName::WebhookDispatch => Arc::new(WebhookDispatchProcessor::new(
                    http_client.clone(),
                    service.clone(),
                )),
                QueueName::DeadLetter => Arc::new(DeadLetterProcessor::new()),
            };

            let queue = service.registry().require(queue_name.as_str())?;
            let handle = WorkerPool::new(queue, processor, config.worker_config(queue_name))
                .with_metrics(metrics.clone())
                .start();
            worker_handles.push(handle);
        }

        info!(
            backend = ?config.backend,
            queues = worker_handles.len(),
            "Job engine started"
        );

        Ok(Self {
            service,
            worker_handles,
        })
    }

    pub fn service(&self) -> &QueueService {
        &self.service
    }

    /// Stop every pool, waiting for in-flight jobs
    pub async fn shutdown(self) -> Result<()> {
        for handle in self.worker_handles {
            let queue = handle.queue_name().to_string();
            handle
                .shutdown()
                .await
                .with_context(|| format!("Failed to stop worker for {}", queue))?;
        }
        info!("Job engine shutdown complete");
        Ok(())
    }
}

async fn build_registry(config: &EngineConfig) -> Result<QueueRegistry> {
    let mut registry = QueueRegistry::new();

    match config.backend {
        BackendKind::Memory => {
            for queue_name in QueueName::ALL {
                registry.register(Arc::new(MemoryBackend::new(queue_name.as_str())))?;
            }
        }
        BackendKind::Redis => register_redis_queues(&mut registry, config).await?,
    }

    Ok(registry)
}

#[cfg(feature = "redis")]
async fn register_redis_queues(registry: &mut QueueRegistry, config: &EngineConfig) -> Result<()> {
    use fin_queue::RedisBackend;

    let conn = fin_queue::backend::redis::connect(&config.broker)
        .await
        .context("Failed to connect to Redis")?;
    for queue_name in QueueName::ALL {
        registry.register(Arc::new(RedisBackend::new(
            conn.clone(),
            &config.broker.key_prefix,
            queue_name.as_str(),
        )))?;
    }
    Ok(())
}

#[cfg(not(feature = "redis"))]
async fn register_redis_queues(_registry: &mut QueueRegistry, _config: &EngineConfig) -> Result<()> {
    anyhow::bail!("QUEUE_BACKEND=redis requires building with the `redis` feature")
}
