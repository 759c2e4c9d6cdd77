//! Error types for fetch operations.
//!
//! This module defines [`FetchError`], which covers every failure a work unit
//! can hit on its way from the remote source to durable storage, and
//! [`ErrorClass`], which tells the orchestrator what to do about it.

use std::time::Duration;
use thiserror::Error;

/// How the orchestrator should treat a [`FetchError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Retried with backoff until the unit's retry budget runs out.
    Transient,
    /// The resource does not exist; a terminal, non-error outcome.
    Absent,
    /// Retrying would reproduce the same failure.
    Permanent,
    /// Configuration or connectivity problem that aborts the whole run.
    Fatal,
}

/// Errors that can occur while fetching or persisting a work unit.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Connection-level failure (DNS, reset, TLS, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete within the per-request timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote source answered with HTTP 429.
    #[error("Rate limited by {provider}: retry after {retry_after:?}")]
    RateLimited {
        /// The provider that rate limited the request.
        provider: String,
        /// Server-suggested time to wait before retrying.
        retry_after: Option<Duration>,
    },

    /// The remote source answered with a 5xx status.
    #[error("Server error: HTTP {status}")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// The requested resource does not exist on the remote source.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The response body could not be interpreted.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// The remote source rejected the request with a non-retryable 4xx status.
    #[error("Request rejected: HTTP {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Writing a payload or completion marker failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Authentication failed for a provider.
    #[error("Authentication failed for provider {0}")]
    AuthenticationFailed(String),

    /// An invalid parameter or configuration value was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The run cannot continue (e.g. the probe request never succeeded).
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Classify this error for the retry policy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_)
            | Self::Timeout(_)
            | Self::RateLimited { .. }
            | Self::Server { .. }
            | Self::Storage(_) => ErrorClass::Transient,
            Self::NotFound(_) => ErrorClass::Absent,
            Self::Malformed(_) | Self::Rejected { .. } => ErrorClass::Permanent,
            Self::AuthenticationFailed(_) | Self::InvalidParameter(_) | Self::Fatal(_) => {
                ErrorClass::Fatal
            }
        }
    }

    /// Returns true if another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Returns true if the error should abort the whole run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Fatal)
    }

    /// Server-suggested delay before the next attempt, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Result type alias using [`FetchError`].
pub type Result<T> = std::result::Result<T, FetchError>;
