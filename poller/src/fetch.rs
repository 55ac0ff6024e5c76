//! Balance fetching.
//!
//! The sampler only sees the [`BalanceFetcher`] trait. [`HordeClient`] is the
//! production implementation, talking to the AI Horde `find_user` endpoint.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the API key.
const API_KEY_HEADER: &str = "apikey";

/// Failure of a single balance fetch.
///
/// The variant decides what the sampler does next: a transient failure skips
/// the cycle, a fatal one stops the poller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The next cycle may succeed (network trouble, server errors, bad bodies).
    #[error("Transient fetch failure: {0}")]
    Transient(String),

    /// Retrying cannot help (bad credentials, unknown user).
    #[error("Fatal fetch failure: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Returns true if the failure should only skip the current cycle.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Source of the current Kudos balance.
#[async_trait]
pub trait BalanceFetcher: Send {
    /// Fetches the current balance.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] classified as transient or fatal.
    async fn fetch_balance(&mut self) -> Result<u64, FetchError>;
}

/// Subset of the `find_user` response the poller cares about.
#[derive(Debug, Deserialize)]
struct UserDetails {
    kudos: f64,
}

/// HTTP client for the AI Horde balance endpoint.
#[derive(Debug, Clone)]
pub struct HordeClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HordeClient {
    /// Creates a client for `url`, authenticating with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kudoman/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        })
    }

    /// The endpoint this client polls.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl BalanceFetcher for HordeClient {
    async fn fetch_balance(&mut self) -> Result<u64, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| FetchError::Transient(describe_request_error(&e)))?;

        if let Some(error) = classify_status(response.status()) {
            return Err(error);
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("failed to read response body: {e}")))?;
        parse_balance(&body)
    }
}

fn describe_request_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("request timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        format!("request failed: {error}")
    }
}

/// Maps a non-success status to a fetch error; `None` for success.
#[must_use]
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let error = match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::Transient(format!("rate limited ({status})")),
        s if s.is_server_error() => FetchError::Transient(format!("server error ({s})")),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::Fatal(format!("API key rejected ({status}), check API_KEY"))
        }
        StatusCode::NOT_FOUND => {
            FetchError::Fatal(format!("user not found ({status}), check API_KEY"))
        }
        s if s.is_client_error() => FetchError::Fatal(format!("request rejected ({s})")),
        s => FetchError::Transient(format!("unexpected status ({s})")),
    };
    Some(error)
}

/// Extracts the balance from a `find_user` body.
///
/// Fractional balances are truncated toward zero.
///
/// # Errors
///
/// Returns [`FetchError::Transient`] if the body is not JSON, lacks a numeric
/// `kudos` field, or holds a negative or non-finite balance.
pub fn parse_balance(body: &str) -> Result<u64, FetchError> {
    let details: UserDetails = serde_json::from_str(body)
        .map_err(|e| FetchError::Transient(format!("malformed response: {e}")))?;

    let kudos = details.kudos;
    if !kudos.is_finite() || kudos < 0.0 {
        return Err(FetchError::Transient(format!(
            "malformed response: kudos balance {kudos} is not a non-negative number"
        )));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let balance = kudos.trunc() as u64;
    Ok(balance)
}
