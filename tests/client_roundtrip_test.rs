//! Reservation client against a live counter.

mod common;

use std::time::Duration;

use common::{tiny_limits, TestServer};
use tollgate::client::{ClientError, CounterClient};

#[tokio::test]
async fn lock_report_status_roundtrip() {
    let server = TestServer::with_limits(tiny_limits(1000, 5, 1)).await;
    let client = CounterClient::new(&server.base_url, "worker-1").unwrap();

    let lease = client.lock(600).await.unwrap();
    assert!(lease.rate.is_some(), "completion leases are compound");

    let status = client.status().await.unwrap();
    assert_eq!(status.locked_tokens, 600);
    assert_eq!(status.available_tokens, 400);
    assert_eq!(status.locked_requests, 1);

    client.report(&lease, 300, 250).await.unwrap();

    let status = client.status().await.unwrap();
    assert_eq!(status.used_tokens, 550);
    assert_eq!(status.locked_tokens, 0);
    assert_eq!(status.used_requests, 1);
    assert!(status.reset_time_seconds <= 60);
}

#[tokio::test]
async fn release_returns_the_full_hold() {
    let server = TestServer::with_limits(tiny_limits(1000, 5, 1)).await;
    let client = CounterClient::new(&server.base_url, "worker-1").unwrap();

    let lease = client.lock(500).await.unwrap();
    client.release(&lease).await.unwrap();

    let status = client.status().await.unwrap();
    assert_eq!(status.locked_tokens, 0);
    assert_eq!(status.available_tokens, 1000);
    assert_eq!(status.locked_requests, 0);
}

#[tokio::test]
async fn denial_surfaces_as_a_quota_error_with_reset_hint() {
    let server = TestServer::with_limits(tiny_limits(100, 5, 1)).await;
    let client = CounterClient::new(&server.base_url, "worker-1").unwrap();

    client.lock(80).await.unwrap();
    let err = client.lock(50).await.unwrap_err();

    match err {
        ClientError::QuotaDenied {
            message,
            seconds_until_reset,
        } => {
            assert!(message.starts_with("Token limit would be exceeded"));
            let reset = seconds_until_reset.unwrap();
            assert!(reset > 0 && reset <= 60);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn zero_amounts_are_forwarded_and_rejected_by_the_counter() {
    let server = TestServer::new().await;
    let client = CounterClient::new(&server.base_url, "worker-1").unwrap();

    let err = client.lock(0).await.unwrap_err();
    match err {
        ClientError::QuotaDenied {
            message,
            seconds_until_reset,
        } => {
            assert!(message.starts_with("Invalid token count"));
            assert!(seconds_until_reset.is_none());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn stale_handles_are_idempotent_from_the_callers_view() {
    let server = TestServer::new().await;
    let client = CounterClient::new(&server.base_url, "worker-1").unwrap();

    let lease = client.lock(100).await.unwrap();
    client.release(&lease).await.unwrap();
    // Releasing or reporting again still succeeds.
    client.release(&lease).await.unwrap();
    client.report(&lease, 10, 10).await.unwrap();
}

#[tokio::test]
async fn embedding_flow_reports_prompt_tokens_only() {
    let server = TestServer::with_limits(tiny_limits(1000, 5, 1)).await;
    let client = CounterClient::new(&server.base_url, "embedder").unwrap();

    let lease = client.lock_embedding(200).await.unwrap();
    client.report_embedding(&lease, 180).await.unwrap();

    let status = client.status_embedding().await.unwrap();
    assert_eq!(status.used_tokens, 180);
    assert_eq!(status.locked_tokens, 0);
    assert_eq!(status.locked_requests, 1);
}

#[tokio::test]
async fn transcription_flow_consumes_one_slot_per_file() {
    let server = TestServer::with_limits(tiny_limits(1000, 5, 2)).await;
    let client = CounterClient::new(&server.base_url, "stt").unwrap();

    let first = client.lock_transcription().await.unwrap();
    let _second = client.lock_transcription().await.unwrap();
    let err = client.lock_transcription().await.unwrap_err();
    assert!(matches!(err, ClientError::QuotaDenied { .. }));

    client.report_transcription(&first).await.unwrap();
    let status = client.status_transcription().await.unwrap();
    assert_eq!(status.used_requests, 1);
    assert_eq!(status.locked_requests, 1);
    assert_eq!(status.available_requests, 0);
}

#[tokio::test]
async fn unreachable_counter_is_a_transport_error() {
    let client =
        CounterClient::with_timeout("http://127.0.0.1:9", "worker-1", Duration::from_millis(200))
            .unwrap();
    let err = client.lock(10).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
}
