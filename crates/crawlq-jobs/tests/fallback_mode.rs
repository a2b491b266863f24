mod common;

use common::*;
use crawlq_jobs::{EnqueueRequest, JobError, QueueMode};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn starts_in_fallback_when_backend_unreachable() {
    let counter = Arc::new(AtomicUsize::new(0));
    let (service, _probe, connector) =
        fallback_service(fast_settings(2), counting_processor(counter)).await;

    assert_eq!(service.mode(), QueueMode::Fallback);
    assert_eq!(connector.connects(), 0);

    let health = service.health().await;
    assert!(health.ok);
    assert_eq!(health.mode, QueueMode::Fallback);
    assert!(!health.backend_reachable);

    service.shutdown().await;
}

#[tokio::test]
async fn falls_back_when_client_fails_to_initialize() {
    let probe = ScriptedProbe::new(true);
    let connector = ScriptedConnector::failing();
    let service = crawlq_jobs::QueueService::start(
        fast_settings(1),
        counting_processor(Arc::new(AtomicUsize::new(0))),
        probe.clone(),
        connector.clone(),
    )
    .await;

    assert_eq!(service.mode(), QueueMode::Fallback);
    assert_eq!(connector.connects(), 1);

    service.shutdown().await;
}

#[tokio::test]
async fn processes_jobs_in_fallback_mode() {
    let counter = Arc::new(AtomicUsize::new(0));
    let (service, _probe, _connector) =
        fallback_service(fast_settings(2), counting_processor(counter.clone())).await;

    for n in 0..5 {
        let receipt = service
            .enqueue(EnqueueRequest::with_payload(json!({ "url": format!("https://example.com/{n}") })))
            .await
            .unwrap();
        assert!(receipt.using_fallback);
    }

    assert!(wait_until(WAIT, || service.metrics().snapshot(0, true).processed == 5).await);

    let snapshot = service.metrics_snapshot().await;
    assert_eq!(snapshot.enqueued, 5);
    assert_eq!(snapshot.processed, 5);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.queue_depth, 0);
    assert!(snapshot.using_fallback);
    assert_eq!(counter.load(Ordering::SeqCst), 5);

    service.shutdown().await;
}

#[tokio::test]
async fn fallback_preserves_fifo_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let seen = seen.clone();
        processor(move |job| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(job.payload["n"].as_u64().unwrap_or_default());
                Ok(json!({}))
            }
        })
    };
    let (service, _probe, _connector) = fallback_service(fast_settings(1), recorder).await;

    for n in 1..=3 {
        service
            .enqueue(EnqueueRequest::with_payload(json!({ "n": n })))
            .await
            .unwrap();
    }

    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 3).await);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);

    service.shutdown().await;
}

#[tokio::test]
async fn rejects_invalid_requests_without_counting() {
    let (service, _probe, _connector) = fallback_service(
        fast_settings(1),
        counting_processor(Arc::new(AtomicUsize::new(0))),
    )
    .await;

    let err = service.enqueue(EnqueueRequest::default()).await.unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));

    let err = service
        .enqueue(EnqueueRequest::with_payload(json!(["not", "an", "object"])))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));

    assert_eq!(service.metrics_snapshot().await.enqueued, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn status_reads_have_no_side_effects() {
    let counter = Arc::new(AtomicUsize::new(0));
    let (service, _probe, _connector) =
        fallback_service(fast_settings(1), counting_processor(counter)).await;

    service
        .enqueue(EnqueueRequest::with_payload(json!({"url": "a"})))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || service.metrics().snapshot(0, true).processed == 1).await);

    let first = service.metrics_snapshot().await;
    let second = service.metrics_snapshot().await;
    assert_eq!(first, second);
    assert_eq!(service.health().await, service.health().await);

    service.shutdown().await;
}

#[tokio::test]
async fn publishes_lifecycle_events() {
    let counter = Arc::new(AtomicUsize::new(0));
    let (service, _probe, _connector) =
        fallback_service(fast_settings(1), counting_processor(counter)).await;
    let mut events = service.events().subscribe();

    service
        .enqueue(EnqueueRequest::with_payload(json!({"url": "a"})))
        .await
        .unwrap();

    let mut names = Vec::new();
    while names.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event not received in time")
            .unwrap();
        names.push(event.name());
    }
    names.sort_unstable();
    assert_eq!(names, vec!["job:completed", "job:enqueued"]);

    service.shutdown().await;
}
