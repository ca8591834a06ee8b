//! # fin-jobs: payment-platform job queues
//!
//! Five queues on top of `fin-queue`, each with its own processor and
//! retry policy:
//!
//! | queue | jobs | attempts | concurrency |
//! |---|---|---|---|
//! | `retry-jobs` | payment, transfer and notification retries | 5 | 5 |
//! | `reconciliation` | transaction, balance and ledger reconciliation | 3 | 2 |
//! | `fraud-scoring` | scoring, account review, suspicious flags | 3 | 10 |
//! | `webhook-dispatch` | signed outbound webhooks | 8 | 20 |
//! | `dead-letter` | jobs that ran out of attempts | 1 | 1 |
//!
//! Producers go through [`QueueService`]; the job ID is derived from the job
//! name and the caller's idempotency key, so resubmitting is a no-op. Jobs
//! that exhaust their attempts land on `dead-letter`.

pub mod config;
pub mod engine;
pub mod payloads;
pub mod processors;
pub mod queues;
pub mod service;

pub use config::{BackendKind, EngineConfig};
pub use engine::{EngineComponents, JobEngine};
pub use payloads::{
    job_names, DeadLetterJobData, DispatchWebhookData, FlagSuspiciousData, JobKind, JobResult,
    Keyed, NotificationChannel, ReconcileBalancesData, ReconcileLedgerData,
    ReconcileTransactionsData, RetryNotificationData, RetryPaymentData, RetryTransferData,
    ReviewAccountData, ReviewPriority, ScoreTransactionData,
};
pub use queues::QueueName;
pub use service::{JobHandle, QueueService};
