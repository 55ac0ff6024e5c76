//! Common test utilities and helpers for integration tests.
//!
//! This module provides an in-process stub of the balance endpoint and
//! helpers for building poller configurations in temporary directories.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use poller::Config;
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// API key the stub accepts.
pub const TEST_API_KEY: &str = "test-key";

/// Path the stub serves.
pub const FIND_USER_PATH: &str = "/api/v2/find_user";

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct StubReply {
    status: StatusCode,
    body: String,
    delay: Duration,
}

impl StubReply {
    /// A `200` reply carrying `kudos`.
    pub fn kudos(kudos: f64) -> Self {
        Self::raw(
            StatusCode::OK,
            &format!(r#"{{"username":"tester#1","kudos":{kudos}}}"#),
        )
    }

    /// A reply with an arbitrary status and body.
    pub fn raw(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    /// Delays the reply by `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone)]
struct StubState {
    replies: Arc<Mutex<VecDeque<StubReply>>>,
    hits: Arc<AtomicUsize>,
}

/// A running stub server.
pub struct StubHorde {
    /// Full URL of the balance endpoint.
    pub url: String,
    hits: Arc<AtomicUsize>,
}

impl StubHorde {
    /// Number of requests served so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// A future that completes once the stub has served `count` requests.
    pub fn after_hits(&self, count: usize) -> impl Future<Output = ()> + Send + 'static {
        let hits = Arc::clone(&self.hits);
        async move {
            while hits.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

async fn find_user(State(stub): State<StubState>, headers: HeaderMap) -> impl IntoResponse {
    stub.hits.fetch_add(1, Ordering::SeqCst);

    let reply = {
        let mut replies = stub.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap()
        }
    };

    if headers.get("apikey").and_then(|v| v.to_str().ok()) != Some(TEST_API_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"message":"Wrong API Key"}"#.to_string(),
        );
    }

    tokio::time::sleep(reply.delay).await;
    (
        reply.status,
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
}

/// Starts a stub that plays `replies` in order, repeating the last one.
///
/// # Panics
///
/// Panics if `replies` is empty or the listener cannot be bound.
pub async fn spawn_stub(replies: Vec<StubReply>) -> StubHorde {
    assert!(!replies.is_empty(), "stub needs at least one reply");
    let state = StubState {
        replies: Arc::new(Mutex::new(replies.into())),
        hits: Arc::new(AtomicUsize::new(0)),
    };
    let hits = Arc::clone(&state.hits);
    let app = Router::new()
        .route(FIND_USER_PATH, get(find_user))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    StubHorde {
        url: format!("http://{addr}{FIND_USER_PATH}"),
        hits,
    }
}

/// A URL nothing is listening on.
pub async fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}{FIND_USER_PATH}")
}

/// A poller configuration rooted in `dir`, polling `url` every second.
pub fn test_config(dir: &Path, url: &str) -> Config {
    let mut config = Config::in_dir(dir, TEST_API_KEY, url);
    config.poll_interval_secs = 1;
    config.request_timeout_secs = 5;
    config
}
