//! # fin-queue: lease-based job queue engine
//!
//! Named durable queues with idempotent admission, priorities, delayed
//! jobs, exponential backoff and stalled-job recovery.
//!
//! - **Idempotent admission**: a job with an existing ID is a no-op that
//!   returns the stored job
//! - **Leases**: every active job carries a lease token; heartbeats renew it
//!   and expired leases are reclaimed by the stalled-job checker
//! - **Ordering**: lower priority values first, FIFO within a priority,
//!   unprioritised jobs last
//! - **Backends**: in-memory for tests and single-process deployments,
//!   Redis for shared state across processes
//!
//! ```rust,no_run
//! use fin_queue::prelude::*;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Processor for Echo {
//!     async fn process(&self, job: &ActiveJob) -> Result<Value, JobError> {
//!         Ok(job.record.data.clone())
//!     }
//! }
//!
//! # async fn run() -> QueueResult<()> {
//! let queue = Arc::new(MemoryBackend::new("echo"));
//! let worker = WorkerPool::new(queue.clone(), Arc::new(Echo), WorkerConfig::default()).start();
//!
//! let opts = JobOptions::new().with_job_id(JobId::for_key("echo", "order-42"));
//! queue.enqueue("echo", json!({ "orderId": 42 }), opts).await?;
//!
//! worker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod backend;
pub mod registry;
pub mod worker;
pub mod observability;

pub use types::{
    Admission, Backoff, CleanState, JobEvent, JobId, JobOptions, JobOutcome, JobRecord,
    JobState, LeaseToken, LeasedJob, QueueStats,
};
pub use error::{JobError, QueueError, QueueResult};
pub use config::{BrokerConfig, WorkerConfig};
pub use backend::{wait_for_outcome, BoxStream, JobQueue, StalledReport};
pub use registry::QueueRegistry;
pub use worker::{ActiveJob, Processor, StalledJobChecker, WorkerHandle, WorkerPool};
pub use observability::{CounterSnapshot, LiveMetrics};

#[cfg(feature = "memory")]
pub use backend::memory::MemoryBackend;

#[cfg(feature = "redis")]
pub use backend::redis::RedisBackend;

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

/// Everything needed to define processors and run workers
pub mod prelude {
    pub use crate::{
        ActiveJob, Backoff, JobError, JobId, JobOptions, JobQueue, JobRecord, JobState,
        Processor, QueueError, QueueRegistry, QueueResult, WorkerConfig, WorkerHandle,
        WorkerPool,
    };

    #[cfg(feature = "memory")]
    pub use crate::MemoryBackend;

    pub use async_trait::async_trait;
}
