//! Typed job payloads.
//!
//! Every job name is bound to exactly one payload type through [`JobKind`],
//! which also fixes the queue it runs on. Payloads are stored wrapped in
//! [`Keyed`] so the idempotency key travels with the data.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

use crate::queues::QueueName;

/// Job names, as stored on each job record
pub mod job_names {
    pub const RETRY_PAYMENT: &str = "retry-payment";
    pub const RETRY_TRANSFER: &str = "retry-transfer";
    pub const RETRY_NOTIFICATION: &str = "retry-notification";
    pub const RECONCILE_TRANSACTIONS: &str = "reconcile-transactions";
    pub const RECONCILE_BALANCES: &str = "reconcile-balances";
    pub const RECONCILE_LEDGER: &str = "reconcile-ledger";
    pub const SCORE_TRANSACTION: &str = "score-transaction";
    pub const REVIEW_ACCOUNT: &str = "review-account";
    pub const FLAG_SUSPICIOUS: &str = "flag-suspicious";
    pub const DISPATCH_WEBHOOK: &str = "dispatch-webhook";
    pub const PROCESS_DLQ: &str = "process-dlq";
}

/// Binds a payload type to its job name and queue
pub trait JobKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
    const QUEUE: QueueName;

    /// Priority for this particular payload; `None` keeps the queue default
    fn priority(&self) -> Option<u32> {
        None
    }
}

/// Payload as stored on the queue: the typed data plus its idempotency key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyed<T> {
    #[serde(flatten)]
    pub data: T,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPaymentData {
    pub transaction_id: String,
    pub user_id: String,
    pub amount: f64,
    pub currency: String,
    pub payment_method: String,
    pub attempt_number: u32,
}

impl JobKind for RetryPaymentData {
    const NAME: &'static str = job_names::RETRY_PAYMENT;
    const QUEUE: QueueName = QueueName::RetryJobs;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryTransferData {
    pub transfer_id: String,
    pub from_account_id: String,
    pub to_account_id: String,
    pub amount: f64,
    pub currency: String,
    pub attempt_number: u32,
}

impl JobKind for RetryTransferData {
    const NAME: &'static str = job_names::RETRY_TRANSFER;
    const QUEUE: QueueName = QueueName::RetryJobs;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Sms,
    Push,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryNotificationData {
    pub notification_id: String,
    pub user_id: String,
    pub channel: NotificationChannel,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl JobKind for RetryNotificationData {
    const NAME: &'static str = job_names::RETRY_NOTIFICATION;
    const QUEUE: QueueName = QueueName::RetryJobs;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileTransactionsData {
    pub start_date: String,
    pub end_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_reconcile: Option<bool>,
}

impl JobKind for ReconcileTransactionsData {
    const NAME: &'static str = job_names::RECONCILE_TRANSACTIONS;
    const QUEUE: QueueName = QueueName::Reconciliation;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileBalancesData {
    pub account_ids: Vec<String>,
    pub as_of_date: String,
}

impl JobKind for ReconcileBalancesData {
    const NAME: &'static str = job_names::RECONCILE_BALANCES;
    const QUEUE: QueueName = QueueName::Reconciliation;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileLedgerData {
    pub ledger_id: String,
    pub period: String,
}

impl JobKind for ReconcileLedgerData {
    const NAME: &'static str = job_names::RECONCILE_LEDGER;
    const QUEUE: QueueName = QueueName::Reconciliation;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreTransactionData {
    pub transaction_id: String,
    pub user_id: String,
    pub amount: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl JobKind for ScoreTransactionData {
    const NAME: &'static str = job_names::SCORE_TRANSACTION;
    const QUEUE: QueueName = QueueName::FraudScoring;

    fn priority(&self) -> Option<u32> {
        Some(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl ReviewPriority {
    /// Queue priority; lower runs sooner
    pub fn queue_priority(&self) -> u32 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Medium | Self::Low => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewAccountData {
    pub account_id: String,
    pub trigger_reason: String,
    pub priority: ReviewPriority,
}

impl JobKind for ReviewAccountData {
    const NAME: &'static str = job_names::REVIEW_ACCOUNT;
    const QUEUE: QueueName = QueueName::FraudScoring;

    fn priority(&self) -> Option<u32> {
        Some(self.priority.queue_priority())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagSuspiciousData {
    pub entity_type: String,
    pub entity_id: String,
    pub reasons: Vec<String>,
    pub score: u32,
}

impl JobKind for FlagSuspiciousData {
    const NAME: &'static str = job_names::FLAG_SUSPICIOUS;
    const QUEUE: QueueName = QueueName::FraudScoring;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchWebhookData {
    pub webhook_id: String,
    pub endpoint: String,
    pub event: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
    pub attempt_number: u32,
}

impl JobKind for DispatchWebhookData {
    const NAME: &'static str = job_names::DISPATCH_WEBHOOK;
    const QUEUE: QueueName = QueueName::WebhookDispatch;
}

/// Record of a job that ran out of attempts. Terminal; never retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterJobData {
    pub original_queue: String,
    pub original_job_name: String,
    pub original_job_data: Value,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
    pub attempts_made: u32,
    pub idempotency_key: String,
}

/// Value every processor returns on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub idempotency_key: String,
}

impl JobResult {
    pub fn success(data: Value, started: Instant, idempotency_key: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            idempotency_key: idempotency_key.into(),
        }
    }

    pub fn into_value(self) -> Result<Value, fin_queue::JobError> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keyed_payload_flattens_data() {
        let keyed = Keyed {
            data: ReconcileLedgerData {
                ledger_id: "ledger-1".into(),
                period: "2024-06".into(),
            },
            idempotency_key: "k1".into(),
        };

        let value = serde_json::to_value(&keyed).unwrap();
        assert_eq!(value, json!({ "ledgerId": "ledger-1", "period": "2024-06", "idempotencyKey": "k1" }));

        let back: Keyed<ReconcileLedgerData> = serde_json::from_value(value).unwrap();
        assert_eq!(back, keyed);
    }

    #[test]
    fn review_priority_maps_to_queue_priority() {
        assert_eq!(ReviewPriority::Critical.queue_priority(), 1);
        assert_eq!(ReviewPriority::High.queue_priority(), 2);
        assert_eq!(ReviewPriority::Medium.queue_priority(), 3);
        assert_eq!(ReviewPriority::Low.queue_priority(), 3);
    }

    #[test]
    fn optional_fields_may_be_omitted() {
        let data: ScoreTransactionData = serde_json::from_value(json!({
            "transactionId": "tx-1",
            "userId": "u-1",
            "amount": 12.5,
            "currency": "USD"
        }))
        .unwrap();
        assert!(data.device_fingerprint.is_none());
        assert_eq!(data.priority(), Some(1));
    }
}
