//! Failure injection tests against real sockets.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use resilient_fetch::{BatchRequest, FetchError, FetchOptions, Orchestrator, Priority};

mod common;

#[tokio::test]
async fn test_retry_on_failure() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move |_| {
        let cc = cc.clone();
        async move {
            let count = cc.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                (503, "Service Unavailable".into())
            } else {
                (200, r#"{"ok":true}"#.into())
            }
        }
    })
    .await;

    let orchestrator = Orchestrator::new(common::test_config()).unwrap();
    let value: serde_json::Value = orchestrator
        .fetch(&format!("http://{}/data", addr), FetchOptions::new(), Priority::Medium)
        .await
        .expect("Should eventually succeed after retries");

    assert_eq!(value["ok"], true);
    assert_eq!(call_count.load(Ordering::SeqCst), 3, "Two failures then success");
    assert_eq!(orchestrator.metrics().retry.successful_retries, 1);
}

#[tokio::test]
async fn test_circuit_breaker_opens() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move |_| {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (503, "Service Unavailable".into())
        }
    })
    .await;

    let orchestrator = Orchestrator::new(common::test_config()).unwrap();
    let url = format!("http://{}/flaky", addr);

    let first = orchestrator
        .fetch_response(&url, FetchOptions::new(), Priority::Medium)
        .await;
    assert_eq!(first.unwrap_err().status(), Some(503));
    assert_eq!(call_count.load(Ordering::SeqCst), 3);

    let second = orchestrator
        .fetch_response(&url, FetchOptions::new(), Priority::Medium)
        .await;
    assert!(second.unwrap_err().is_circuit_open());
    assert_eq!(call_count.load(Ordering::SeqCst), 5);

    let started = Instant::now();
    let third = orchestrator
        .fetch_response(&url, FetchOptions::new(), Priority::Medium)
        .await;
    assert!(third.unwrap_err().is_circuit_open());
    assert_eq!(call_count.load(Ordering::SeqCst), 5, "No network call while open");
    assert!(started.elapsed() < Duration::from_millis(50), "Open circuit fails fast");
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move |_| {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (404, "missing".into())
        }
    })
    .await;

    let orchestrator = Orchestrator::new(common::test_config()).unwrap();
    let err = orchestrator
        .fetch_response(&format!("http://{}/nope", addr), FetchOptions::new(), Priority::Medium)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_refused_is_retried() {
    // Grab a free port and close it again.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let orchestrator = Orchestrator::new(common::test_config()).unwrap();
    let err = orchestrator
        .fetch_response(&format!("http://{}/", addr), FetchOptions::new(), Priority::Medium)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Network { .. }), "got {:?}", err);
    assert_eq!(err.code(), Some("ECONNREFUSED"));
    assert_eq!(orchestrator.metrics().retry.total_attempts, 3);
}

#[tokio::test]
async fn test_concurrent_requests_coalesce() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move |_| {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            (200, r#"{"n":1}"#.into())
        }
    })
    .await;

    let orchestrator = Orchestrator::new(common::test_config()).unwrap();
    let url = format!("http://{}/shared", addr);

    let (a, b, c) = tokio::join!(
        orchestrator.fetch::<serde_json::Value>(&url, FetchOptions::new(), Priority::Low),
        orchestrator.fetch::<serde_json::Value>(&url, FetchOptions::new(), Priority::Medium),
        orchestrator.fetch::<serde_json::Value>(&url, FetchOptions::new(), Priority::High),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert!(c.is_ok());
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.metrics().dedup.coalesced_requests, 2);
}

#[tokio::test]
async fn test_deadline_expires() {
    let addr = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "{}".into())
    })
    .await;

    let orchestrator = Orchestrator::new(common::test_config()).unwrap();
    let started = Instant::now();
    let err = orchestrator
        .fetch_response(
            &format!("http://{}/slow", addr),
            FetchOptions::new().timeout_ms(200),
            Priority::Medium,
        )
        .await
        .unwrap_err();

    assert!(err.is_deadline_exceeded());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(orchestrator.metrics().pool.active_connections, 0);
}

#[tokio::test]
async fn test_fallback_and_batch_isolation() {
    let addr = common::start_programmable_backend(|request| async move {
        if request.path == "/missing" {
            (404, "missing".into())
        } else {
            (200, "\"present\"".into())
        }
    })
    .await;

    let orchestrator = Orchestrator::new(common::test_config()).unwrap();

    let value: String = orchestrator
        .fetch_with_fallback(
            &format!("http://{}/missing", addr),
            FetchOptions::new(),
            "default".to_string(),
        )
        .await;
    assert_eq!(value, "default");

    let results = orchestrator
        .fetch_batch::<String>(vec![
            BatchRequest::get(format!("http://{}/a", addr)),
            BatchRequest::get(format!("http://{}/missing", addr)),
            BatchRequest::get(format!("http://{}/b", addr)),
        ])
        .await;

    assert_eq!(results[0].as_deref(), Ok("present"));
    assert_eq!(results[1].as_ref().unwrap_err().status(), Some(404));
    assert_eq!(results[2].as_deref(), Ok("present"));
    assert_eq!(orchestrator.metrics().fetch.fallbacks_used, 1);
}

#[tokio::test]
async fn test_shutdown_rejects_new_fetches() {
    let addr = common::start_mock_backend("{}").await;
    let orchestrator = Orchestrator::new(common::test_config()).unwrap();

    orchestrator.shutdown();
    let err = orchestrator
        .fetch_response(&format!("http://{}/", addr), FetchOptions::new(), Priority::High)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::ShuttingDown { .. }));
}
