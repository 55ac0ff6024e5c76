//! Integration tests for the HTTP balance fetcher.
//!
//! Tests cover:
//! - Successful balance parsing
//! - Fatal and transient status classification
//! - Malformed bodies, timeouts and refused connections

use axum::http::StatusCode;
use poller::{BalanceFetcher, FetchError, HordeClient};
use std::time::Duration;

use super::common::{spawn_stub, unused_url, StubReply, TEST_API_KEY};

fn client(url: &str) -> HordeClient {
    HordeClient::new(url, TEST_API_KEY, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_fetch_balance_success() {
    let stub = spawn_stub(vec![StubReply::kudos(1234.0)]).await;

    let balance = client(&stub.url).fetch_balance().await;

    assert_eq!(balance, Ok(1234));
    assert_eq!(stub.hits(), 1);
}

#[tokio::test]
async fn test_fetch_balance_truncates_fraction() {
    let stub = spawn_stub(vec![StubReply::kudos(1234.9)]).await;

    assert_eq!(client(&stub.url).fetch_balance().await, Ok(1234));
}

#[tokio::test]
async fn test_fetch_wrong_key_is_fatal() {
    let stub = spawn_stub(vec![StubReply::kudos(10.0)]).await;
    let mut client = HordeClient::new(&stub.url, "wrong-key", Duration::from_secs(5)).unwrap();

    let error = client.fetch_balance().await.unwrap_err();

    assert!(matches!(error, FetchError::Fatal(_)));
}

#[tokio::test]
async fn test_fetch_unknown_user_is_fatal() {
    let stub = spawn_stub(vec![StubReply::raw(
        StatusCode::NOT_FOUND,
        r#"{"message":"User not found"}"#,
    )])
    .await;

    let error = client(&stub.url).fetch_balance().await.unwrap_err();

    assert!(matches!(error, FetchError::Fatal(_)));
}

#[tokio::test]
async fn test_fetch_server_error_is_transient() {
    let stub = spawn_stub(vec![StubReply::raw(StatusCode::SERVICE_UNAVAILABLE, "")]).await;

    let error = client(&stub.url).fetch_balance().await.unwrap_err();

    assert!(error.is_transient());
}

#[tokio::test]
async fn test_fetch_rate_limited_is_transient() {
    let stub = spawn_stub(vec![StubReply::raw(StatusCode::TOO_MANY_REQUESTS, "")]).await;

    let error = client(&stub.url).fetch_balance().await.unwrap_err();

    assert!(error.is_transient());
}

#[tokio::test]
async fn test_fetch_malformed_body_is_transient() {
    let stub = spawn_stub(vec![StubReply::raw(StatusCode::OK, "not json")]).await;

    let error = client(&stub.url).fetch_balance().await.unwrap_err();

    assert!(error.is_transient());
}

#[tokio::test]
async fn test_fetch_timeout_is_transient() {
    let stub = spawn_stub(vec![StubReply::kudos(1.0).delayed(Duration::from_secs(5))]).await;
    let mut client =
        HordeClient::new(&stub.url, TEST_API_KEY, Duration::from_millis(200)).unwrap();

    let error = client.fetch_balance().await.unwrap_err();

    assert!(error.is_transient());
}

#[tokio::test]
async fn test_fetch_connection_refused_is_transient() {
    let url = unused_url().await;

    let error = client(&url).fetch_balance().await.unwrap_err();

    assert!(error.is_transient());
}

#[tokio::test]
async fn test_fetch_recovers_after_transient_failure() {
    let stub = spawn_stub(vec![
        StubReply::raw(StatusCode::BAD_GATEWAY, ""),
        StubReply::kudos(42.0),
    ])
    .await;
    let mut client = client(&stub.url);

    assert!(client.fetch_balance().await.unwrap_err().is_transient());
    assert_eq!(client.fetch_balance().await, Ok(42));
}
