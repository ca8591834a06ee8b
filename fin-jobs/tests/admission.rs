use std::sync::Arc;
use std::time::Duration;

use fin_jobs::{
    FlagSuspiciousData, QueueName, QueueService, ReviewAccountData, ReviewPriority,
    RetryPaymentData, ScoreTransactionData,
};
use fin_queue::{JobQueue, LiveMetrics, MemoryBackend, QueueRegistry};
use tokio_test::{assert_err, assert_ok};

const LOCK: Duration = Duration::from_secs(30);

fn service() -> QueueService {
    let mut registry = QueueRegistry::new();
    for name in QueueName::ALL {
        registry.register(Arc::new(MemoryBackend::new(name.as_str()))).unwrap();
    }
    QueueService::new(registry, LiveMetrics::new())
}

fn payment() -> RetryPaymentData {
    RetryPaymentData {
        transaction_id: "tx-1".into(),
        user_id: "u-1".into(),
        amount: 120.0,
        currency: "EUR".into(),
        payment_method: "card".into(),
        attempt_number: 1,
    }
}

fn review(priority: ReviewPriority) -> ReviewAccountData {
    ReviewAccountData {
        account_id: format!("acc-{:?}", priority),
        trigger_reason: "velocity".into(),
        priority,
    }
}

fn flag() -> FlagSuspiciousData {
    FlagSuspiciousData {
        entity_type: "account".into(),
        entity_id: "acc-9".into(),
        reasons: vec!["manual".into()],
        score: 10,
    }
}

#[tokio::test]
async fn same_kind_and_key_admits_one_job() {
    let service = service();

    let first = assert_ok!(service.enqueue_retry_payment(payment(), Some("tx-1".into())).await);
    let second = assert_ok!(service.enqueue_retry_payment(payment(), Some("tx-1".into())).await);

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.job_id, second.job_id);
    assert_eq!(first.job_id.as_str(), "retry-payment-tx-1");

    let stats = service.get_queue_stats("retry-jobs").await.unwrap().unwrap();
    assert_eq!(stats.waiting, 1);
    assert_eq!(service.metrics().queue_snapshot("retry-jobs").added, 1);
}

#[tokio::test]
async fn retry_policy_follows_queue() {
    let service = service();
    let handle = service.enqueue_retry_payment(payment(), Some("tx-2".into())).await.unwrap();

    let record = handle.record().await.unwrap().unwrap();
    assert_eq!(record.opts.attempts, 5);
    assert_eq!(record.opts.backoff, fin_queue::Backoff::exponential(1000));
    assert_eq!(record.data["transactionId"], "tx-1");
    assert_eq!(record.data["idempotencyKey"], "tx-2");
}

#[tokio::test]
async fn review_priority_mapping() {
    let service = service();

    let critical = service.enqueue_review_account(review(ReviewPriority::Critical), None).await.unwrap();
    let low = service.enqueue_review_account(review(ReviewPriority::Low), None).await.unwrap();

    assert_eq!(critical.record().await.unwrap().unwrap().opts.priority, Some(1));
    assert_eq!(low.record().await.unwrap().unwrap().opts.priority, Some(3));
}

#[tokio::test]
async fn fraud_jobs_lease_by_priority() {
    let service = service();

    let flagged = service.enqueue_flag_suspicious(flag(), None).await.unwrap();
    let low = service.enqueue_review_account(review(ReviewPriority::Low), None).await.unwrap();
    let high = service.enqueue_review_account(review(ReviewPriority::High), None).await.unwrap();
    let scored = service
        .enqueue_score_transaction(
            ScoreTransactionData {
                transaction_id: "tx-3".into(),
                user_id: "u-1".into(),
                amount: 10.0,
                currency: "USD".into(),
                ip_address: None,
                device_fingerprint: Some("fp".into()),
                location: None,
                metadata: None,
            },
            None,
        )
        .await
        .unwrap();

    let queue = service.registry().require("fraud-scoring").unwrap();
    let mut order = Vec::new();
    while let Some(leased) = queue.lease(LOCK).await.unwrap() {
        order.push(leased.record.id);
    }

    assert_eq!(order, vec![scored.job_id, high.job_id, low.job_id, flagged.job_id]);
}

#[tokio::test]
async fn stats_report_six_counters() {
    let service = service();

    assert_eq!(service.get_queue_stats("unknown").await.unwrap(), None);

    let stats = service.get_queue_stats("dead-letter").await.unwrap().unwrap();
    let json = serde_json::to_value(&stats).unwrap();
    for counter in ["waiting", "active", "completed", "failed", "delayed", "paused"] {
        assert_eq!(json[counter], 0, "{counter}");
    }
    assert_eq!(json["queueName"], "dead-letter");

    let all = service.get_all_queue_stats().await.unwrap();
    let names: Vec<_> = all.iter().map(|s| s.queue_name.as_str()).collect();
    assert_eq!(
        names,
        vec!["retry-jobs", "reconciliation", "fraud-scoring", "webhook-dispatch", "dead-letter"]
    );
}

#[tokio::test]
async fn paused_queue_reports_waiting_as_paused() {
    let service = service();
    service.enqueue_retry_payment(payment(), None).await.unwrap();
    service.pause_queue("retry-jobs").await.unwrap();

    let stats = service.get_queue_stats("retry-jobs").await.unwrap().unwrap();
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.paused, 1);

    let queue = service.registry().require("retry-jobs").unwrap();
    assert!(queue.lease(LOCK).await.unwrap().is_none());

    service.resume_queue("retry-jobs").await.unwrap();
    assert!(queue.lease(LOCK).await.unwrap().is_some());
}

#[tokio::test]
async fn control_plane_rejects_unknown_targets() {
    let service = service();

    let err = assert_err!(service.retry_failed_job("nope", "job-1").await);
    assert_eq!(err.to_string(), "Queue nope not found");

    let err = assert_err!(service.retry_failed_job("retry-jobs", "job-1").await);
    assert_eq!(err.to_string(), "Job job-1 not found");

    let handle = service.enqueue_retry_payment(payment(), Some("k".into())).await.unwrap();
    let err = assert_err!(service.retry_failed_job("retry-jobs", handle.job_id.as_str()).await);
    assert_eq!(err.to_string(), "Job retry-payment-k is not in failed state");

    assert_err!(
        service
            .clean_queue("nope", Duration::ZERO, 0, fin_queue::CleanState::Completed)
            .await
    );
}
