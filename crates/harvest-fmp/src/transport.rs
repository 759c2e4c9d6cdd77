//! HTTP transport seam.
//!
//! [`FmpClient`](crate::FmpClient) talks to the network only through the
//! [`Transport`] trait so that classification and budgeting can be tested
//! against scripted responses.

use async_trait::async_trait;
use harvest_core::{FetchError, Result};
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use std::fmt::Debug;
use std::time::Duration;

/// Status, rate hint, and body of one HTTP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` header (seconds form only).
    pub retry_after: Option<Duration>,
    /// Response body.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// A response with the given status and body and no rate hint.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Sets the `Retry-After` hint.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Issues a single GET request.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Performs a GET and returns the raw response, whatever its status.
    ///
    /// Errors are reserved for requests that produced no response at all.
    async fn get(&self, url: &str) -> Result<RawResponse>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Build a transport whose client enforces `timeout` per request.
    ///
    /// # Errors
    /// Returns [`FetchError::InvalidParameter`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::InvalidParameter(format!("HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// Wrap a pre-configured client.
    #[must_use]
    pub const fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<RawResponse> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                // reqwest errors embed the URL, which carries the API key
                FetchError::Network(e.without_url().to_string())
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Network(e.without_url().to_string())
            }
        })?;

        Ok(RawResponse {
            status,
            retry_after,
            body: body.to_vec(),
        })
    }
}
