use std::time::Duration;
use chrono::Utc;
use proptest::prelude::*;
use serde_json::json;
use tokio_stream::StreamExt;

use fin_queue::{
    backend::{memory::MemoryBackend, JobQueue},
    Backoff, CleanState, JobEvent, JobId, JobOptions, JobState, LeaseToken, QueueError,
};

const LOCK: Duration = Duration::from_secs(30);

/// Test factory functions
fn keyed(key: &str) -> JobOptions {
    JobOptions::new()
        .with_job_id(JobId::for_key("test-job", key))
        .with_attempts(3)
        .with_backoff(Backoff::exponential(1000))
}

async fn receive_next_event(stream: &mut fin_queue::BoxStream<JobEvent>) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended")
}

/// A1. Lease assigns a token and deadline atomically
#[tokio::test]
async fn test_lease_assigns_token() {
    let backend = MemoryBackend::new("default");

    // Arrange: enqueue one job
    let job_id = backend.enqueue("test-job", json!({"n": 1}), keyed("a1")).await.unwrap().record.id;

    // Act: lease
    let leased = backend.lease(LOCK).await.unwrap().unwrap();

    // Assert: lease recorded on the stored job
    assert_eq!(leased.record.id, job_id);
    assert!(!leased.lease_token.as_str().is_empty());
    assert!(leased.lease_until > Utc::now());

    let record = backend.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Active);
    assert_eq!(record.lease_token, Some(leased.lease_token));

    // Nothing else to lease
    assert!(backend.lease(LOCK).await.unwrap().is_none());
}

/// A2. Only the lease holder can acknowledge
#[tokio::test]
async fn test_only_lease_holder_can_ack() {
    let backend = MemoryBackend::new("default");
    let job_id = backend.enqueue("test-job", json!(null), keyed("a2")).await.unwrap().record.id;
    let leased = backend.lease(LOCK).await.unwrap().unwrap();

    let result = backend.ack(&job_id, &LeaseToken::new(), json!(null)).await;
    assert_eq!(result.unwrap_err(), QueueError::InvalidLeaseToken);

    let record = backend.ack(&job_id, &leased.lease_token, json!({"ok": true})).await.unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.return_value, Some(json!({"ok": true})));
    assert_eq!(record.progress, 100);
}

/// A3. Expired leases cannot be acknowledged
#[tokio::test]
async fn test_expired_lease_rejected() {
    let backend = MemoryBackend::new("default");
    let job_id = backend.enqueue("test-job", json!(null), keyed("a3")).await.unwrap().record.id;
    let leased = backend.lease(LOCK).await.unwrap().unwrap();

    backend.force_lease_expiry(&job_id).await.unwrap();

    let result = backend.ack(&job_id, &leased.lease_token, json!(null)).await;
    assert_eq!(result.unwrap_err(), QueueError::LeaseExpired);
}

/// B1. Duplicate admission is a no-op
#[tokio::test]
async fn test_duplicate_admission_is_noop() {
    let backend = MemoryBackend::new("default");

    let first = backend.enqueue("test-job", json!({"amount": 1}), keyed("b1")).await.unwrap();
    let leased = backend.lease(LOCK).await.unwrap().unwrap();
    backend.ack(leased.job_id(), &leased.lease_token, json!(null)).await.unwrap();

    // Even after completion the ID stays taken
    let second = backend.enqueue("test-job", json!({"amount": 2}), keyed("b1")).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(second.record.id, first.record.id);
    assert_eq!(second.record.state, JobState::Completed);
    assert_eq!(second.record.data, json!({"amount": 1}));
}

/// C1. Delayed jobs are not leased before they are due
#[tokio::test]
async fn test_delayed_job_waits() {
    let backend = MemoryBackend::new("default");
    let opts = keyed("c1").with_delay(Duration::from_secs(60));
    let job_id = backend.enqueue("test-job", json!(null), opts).await.unwrap().record.id;

    assert!(backend.lease(LOCK).await.unwrap().is_none());
    assert_eq!(backend.stats().await.unwrap().delayed, 1);

    backend.promote_now(&job_id).await.unwrap();
    let leased = backend.lease(LOCK).await.unwrap().unwrap();
    assert_eq!(leased.record.id, job_id);
}

/// C2. A failed attempt is parked with backoff
#[tokio::test]
async fn test_failed_attempt_is_delayed() {
    let backend = MemoryBackend::new("default");
    let job_id = backend.enqueue("test-job", json!(null), keyed("c2")).await.unwrap().record.id;
    let leased = backend.lease(LOCK).await.unwrap().unwrap();

    let retry_at = Utc::now() + chrono::Duration::seconds(60);
    let record = backend
        .nack(&job_id, &leased.lease_token, "upstream unavailable".into(), Some(retry_at))
        .await
        .unwrap();

    assert_eq!(record.state, JobState::Delayed);
    assert_eq!(record.run_at, retry_at);
    assert_eq!(record.failed_reason.as_deref(), Some("upstream unavailable"));
    assert!(backend.lease(LOCK).await.unwrap().is_none());
}

/// D1. Manual retry resets the attempt budget
#[tokio::test]
async fn test_manual_retry_of_failed_job() {
    let backend = MemoryBackend::new("default");
    let opts = keyed("d1").with_attempts(1);
    let job_id = backend.enqueue("test-job", json!(null), opts).await.unwrap().record.id;
    let leased = backend.lease(LOCK).await.unwrap().unwrap();
    backend.nack(&job_id, &leased.lease_token, "boom".into(), None).await.unwrap();

    let failed = backend.get_failed(0, 9).await.unwrap();
    assert_eq!(failed.len(), 1);

    let record = backend.retry_job(&job_id).await.unwrap();
    assert_eq!(record.state, JobState::Waiting);
    assert_eq!(record.attempts_made, 0);
    assert!(record.failed_reason.is_none());

    let leased = backend.lease(LOCK).await.unwrap().unwrap();
    assert_eq!(leased.record.attempts_made, 1);
}

/// D2. Failed jobs are listed newest first within an inclusive range
#[tokio::test]
async fn test_get_failed_newest_first() {
    let backend = MemoryBackend::new("default");
    let mut ids = Vec::new();
    for key in ["x", "y", "z"] {
        let opts = keyed(key).with_attempts(1);
        let job_id = backend.enqueue("test-job", json!(null), opts).await.unwrap().record.id;
        let leased = backend.lease(LOCK).await.unwrap().unwrap();
        backend.nack(&job_id, &leased.lease_token, "boom".into(), None).await.unwrap();
        ids.push(job_id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let newest_two: Vec<JobId> = backend
        .get_failed(0, 1)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(newest_two, vec![ids[2].clone(), ids[1].clone()]);
}

/// E1. Clean removes only old terminal jobs of the requested state
#[tokio::test]
async fn test_clean_by_state_and_grace() {
    let backend = MemoryBackend::new("default");
    let job_id = backend.enqueue("test-job", json!(null), keyed("e1")).await.unwrap().record.id;
    let leased = backend.lease(LOCK).await.unwrap().unwrap();
    backend.ack(&job_id, &leased.lease_token, json!(null)).await.unwrap();

    let removed = backend
        .clean(Duration::from_secs(3600), 0, CleanState::Completed)
        .await
        .unwrap();
    assert!(removed.is_empty());

    let removed = backend.clean(Duration::ZERO, 0, CleanState::Completed).await.unwrap();
    assert_eq!(removed, vec![job_id.clone()]);
    assert!(backend.get_job(&job_id).await.unwrap().is_none());
}

/// F1. Lifecycle events are observable
#[tokio::test]
async fn test_event_stream_lifecycle() {
    let backend = MemoryBackend::new("default");
    let mut events = backend.event_stream();

    let job_id = backend.enqueue("test-job", json!(null), keyed("f1")).await.unwrap().record.id;
    let leased = backend.lease(LOCK).await.unwrap().unwrap();
    backend.update_progress(&job_id, &leased.lease_token, 50).await.unwrap();
    backend.ack(&job_id, &leased.lease_token, json!(null)).await.unwrap();

    let names: Vec<&str> = vec![
        receive_next_event(&mut events).await.event_name(),
        receive_next_event(&mut events).await.event_name(),
        receive_next_event(&mut events).await.event_name(),
        receive_next_event(&mut events).await.event_name(),
    ];
    assert_eq!(names, vec!["added", "active", "progress", "completed"]);
}

proptest! {
    /// G1. Lease order is priority ascending, then admission order, unprioritised last
    #[test]
    fn lease_order_matches_priority_then_fifo(priorities in proptest::collection::vec(proptest::option::of(0u32..5), 1..20)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let leased_ranks = rt.block_on(async {
            let backend = MemoryBackend::new("default");
            for priority in &priorities {
                let mut opts = JobOptions::new();
                opts.priority = *priority;
                backend.enqueue("test-job", json!(null), opts).await.unwrap();
            }

            let mut order = Vec::new();
            while let Some(leased) = backend.lease(LOCK).await.unwrap() {
                order.push((leased.record.opts.priority_rank(), leased.record.seq));
            }
            order
        });

        let mut expected = leased_ranks.clone();
        expected.sort();
        prop_assert_eq!(leased_ranks.len(), priorities.len());
        prop_assert_eq!(leased_ranks, expected);
    }
}
