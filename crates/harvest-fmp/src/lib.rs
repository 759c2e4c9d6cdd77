#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/harvest/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Financial Modeling Prep (FMP) rate-limited client.
//!
//! This crate implements the harvest-core provider traits for the
//! [Financial Modeling Prep](https://financialmodelingprep.com/) API.
//! Every request first takes a slot from a shared [`RateBudget`] and is
//! bounded by a hard timeout; responses are classified into
//! [`Fetched`] values or [`FetchError`]s whose class drives retries.
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvest_fmp::FmpClient;
//! use harvest_core::{FetchConfig, Period, ResourceType, StatementProvider, WorkUnit};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FmpClient::new("your_api_key", &FetchConfig::default())?;
//!
//!     let unit = WorkUnit::new("AAPL", ResourceType::INCOME_STATEMENT, Period::Annual)
//!         .with_limit(5);
//!     let fetched = client.fetch(&unit).await?;
//!
//!     Ok(())
//! }
//! ```

/// Shared request budget.
pub mod budget;
/// HTTP transport seam.
pub mod transport;
/// Company directory enumeration.
pub mod universe;

pub use budget::RateBudget;
pub use transport::{RawResponse, ReqwestTransport, Transport};
pub use universe::{ListingFilter, country_exchanges, exchange_summary};

use async_trait::async_trait;
use harvest_core::{
    FetchConfig, FetchError, Fetched, Payload, Result, StatementProvider, WorkUnit,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Base URL for the FMP v3 API.
const FMP_BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

/// Provider name used in errors and logs.
const PROVIDER_NAME: &str = "FMP";

/// Cheap request used to verify credentials before a run.
const PROBE_ENDPOINT: &str = "profile/AAPL";

/// Longest body excerpt carried in error messages.
const MAX_EXCERPT: usize = 200;

/// Financial Modeling Prep client.
///
/// Cloning is cheap; clones share the transport and the rate budget.
#[derive(Clone)]
pub struct FmpClient {
    transport: Arc<dyn Transport>,
    budget: Arc<RateBudget>,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for FmpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FmpClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("budget", &self.budget)
            .finish()
    }
}

impl FmpClient {
    /// Create a client with a `reqwest` transport and a fresh budget, both
    /// sized from `config`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, config: &FetchConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            Arc::new(RateBudget::from_config(config)),
            api_key,
        )
        .with_timeout(config.request_timeout))
    }

    /// Create a client over an existing transport and shared budget.
    #[must_use]
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        budget: Arc<RateBudget>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            budget,
            base_url: FMP_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Override the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the per-request hard timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The shared rate budget.
    #[must_use]
    pub const fn budget(&self) -> &Arc<RateBudget> {
        &self.budget
    }

    /// Build a URL with the API key appended.
    fn url(&self, endpoint: &str) -> String {
        if endpoint.contains('?') {
            format!("{}/{endpoint}&apikey={}", self.base_url, self.api_key)
        } else {
            format!("{}/{endpoint}?apikey={}", self.base_url, self.api_key)
        }
    }

    /// Endpoint (path and query, without the key) for a work unit.
    #[must_use]
    pub fn unit_endpoint(unit: &WorkUnit) -> String {
        if unit.period.is_trailing() {
            return format!("{}-ltm/{}", unit.resource, unit.symbol.as_str());
        }
        let limit_param = unit
            .limit
            .map(|l| format!("&limit={l}"))
            .unwrap_or_default();
        format!(
            "{}/{}?period={}{limit_param}",
            unit.resource,
            unit.symbol.as_str(),
            unit.period
        )
    }

    /// Take a budget slot and issue one GET, bounded by the hard timeout.
    pub(crate) async fn get_raw(&self, endpoint: &str) -> Result<RawResponse> {
        self.budget.acquire().await;
        debug!("FMP request: {}", endpoint);

        let url = self.url(endpoint);
        tokio::time::timeout(self.timeout, self.transport.get(&url))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }

    /// GET an endpoint and parse its JSON array body into `T` records.
    pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<Vec<T>> {
        match classify(self.get_raw(endpoint).await?)? {
            Fetched::Absent(_) => Ok(Vec::new()),
            Fetched::Payload(payload) => serde_json::from_slice(payload.as_bytes())
                .map_err(|e| FetchError::Malformed(format!("{endpoint}: {e}"))),
        }
    }
}

#[async_trait]
impl StatementProvider for FmpClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch(&self, unit: &WorkUnit) -> Result<Fetched> {
        let endpoint = Self::unit_endpoint(unit);
        let fetched = classify(self.get_raw(&endpoint).await?);
        if let Err(FetchError::Malformed(ref reason)) = fetched {
            warn!(unit = %unit, %reason, "Malformed FMP response");
        }
        fetched
    }

    async fn probe(&self) -> Result<()> {
        classify(self.get_raw(PROBE_ENDPOINT).await?).map(|_| ())
    }
}

/// Translate an HTTP response into a fetch outcome.
///
/// FMP answers unknown symbols with `[]` and reports key and quota problems
/// as a 200 with an `"Error Message"` object.
pub fn classify(response: RawResponse) -> Result<Fetched> {
    let status = response.status;
    match status {
        200..=299 => {}
        401 | 403 => return Err(FetchError::AuthenticationFailed(PROVIDER_NAME.to_string())),
        404 => return Ok(Fetched::Absent("HTTP 404".to_string())),
        429 => {
            return Err(FetchError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
                retry_after: response.retry_after,
            });
        }
        500..=599 => return Err(FetchError::Server { status }),
        _ => {
            return Err(FetchError::Rejected {
                status,
                message: excerpt(&response.body),
            });
        }
    }

    let value: Value = serde_json::from_slice(&response.body)
        .map_err(|e| FetchError::Malformed(format!("{e}: {}", excerpt(&response.body))))?;

    match value {
        Value::Array(records) if records.is_empty() => {
            Ok(Fetched::Absent("empty result set".to_string()))
        }
        Value::Array(records) => Ok(Fetched::Payload(Payload::new(
            response.body,
            records.len(),
        ))),
        Value::Object(map) => match map.get("Error Message").and_then(Value::as_str) {
            Some(message) => Err(error_message(message)),
            None => Err(FetchError::Malformed(format!(
                "expected JSON array, got object: {}",
                excerpt(&response.body)
            ))),
        },
        other => Err(FetchError::Malformed(format!(
            "expected JSON array, got {other}"
        ))),
    }
}

fn error_message(message: &str) -> FetchError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("api key") || lower.contains("apikey") {
        FetchError::AuthenticationFailed(format!("{PROVIDER_NAME}: {message}"))
    } else if lower.contains("limit reach") {
        FetchError::Fatal(format!("{PROVIDER_NAME} quota exhausted: {message}"))
    } else {
        FetchError::Malformed(message.to_string())
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX_EXCERPT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}
