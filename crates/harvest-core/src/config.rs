//! Run configuration consumed by the orchestrator, client, and sinks.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FetchError, Result};
use crate::types::PayloadFormat;

/// Exponential backoff with jitter between retry attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub base: Duration,
    /// Upper bound on any single delay (before jitter).
    #[serde(with = "millis")]
    pub max: Duration,
    /// Extra random delay, as a percentage of the computed delay.
    pub jitter_percent: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter_percent: 20,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (1-based), without jitter.
    #[must_use]
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base
            .saturating_mul(1u32 << exp)
            .min(self.max)
    }

    /// Delay before retry number `retry` (1-based), with jitter applied and
    /// never shorter than `hint` when the server suggested one.
    #[must_use]
    pub fn delay(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let nominal = self.nominal_delay(retry);
        let base_ms = u64::try_from(nominal.as_millis()).unwrap_or(u64::MAX);
        let jitter_range = if self.jitter_percent == 0 {
            1
        } else {
            std::cmp::max(1, base_ms.saturating_mul(u64::from(self.jitter_percent)) / 100)
        };
        let jittered = Duration::from_millis(base_ms + rand::rng().random_range(0..jitter_range));
        hint.map_or(jittered, |h| jittered.max(h))
    }
}

/// Configuration surface of a bulk fetch run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum number of units in flight at once.
    pub concurrency: usize,
    /// Requests allowed in any window of length [`Self::window`].
    pub requests_per_window: u32,
    /// Length of the rate window.
    #[serde(with = "millis")]
    pub window: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Hard timeout for a single request.
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// Root directory for persisted payloads.
    pub output_root: PathBuf,
    /// Encoding of persisted payloads.
    pub format: PayloadFormat,
    /// Emit a progress event every this many terminal units (0 disables).
    pub progress_every: usize,
    /// Retry backoff policy.
    pub backoff: BackoffPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            requests_per_window: 300,
            window: Duration::from_secs(60),
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            output_root: PathBuf::from("data/financial_statements"),
            format: PayloadFormat::Json,
            progress_every: 10,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl FetchConfig {
    /// Checks that the configuration can drive a run.
    ///
    /// # Errors
    /// Returns [`FetchError::InvalidParameter`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(FetchError::InvalidParameter(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.requests_per_window == 0 {
            return Err(FetchError::InvalidParameter(
                "requests_per_window must be at least 1".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(FetchError::InvalidParameter(
                "window must be non-zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(FetchError::InvalidParameter(
                "request_timeout must be non-zero".to_string(),
            ));
        }
        if self.backoff.base > self.backoff.max {
            return Err(FetchError::InvalidParameter(format!(
                "backoff base {:?} exceeds max {:?}",
                self.backoff.base, self.backoff.max
            )));
        }
        Ok(())
    }
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(FetchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = FetchConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(FetchError::InvalidParameter(_))
        ));

        let config = FetchConfig {
            window: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FetchConfig {
            backoff: BackoffPolicy {
                base: Duration::from_secs(10),
                max: Duration::from_secs(1),
                jitter_percent: 0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            jitter_percent: 0,
        };
        assert_eq!(policy.nominal_delay(1), Duration::from_millis(100));
        assert_eq!(policy.nominal_delay(2), Duration::from_millis(200));
        assert_eq!(policy.nominal_delay(3), Duration::from_millis(400));
        assert_eq!(policy.nominal_delay(10), Duration::from_millis(1000));
        assert_eq!(policy.delay(2, None), Duration::from_millis(200));
    }

    #[test]
    fn test_backoff_jitter_bounds_and_hint() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1000),
            max: Duration::from_secs(10),
            jitter_percent: 50,
        };
        for _ in 0..50 {
            let d = policy.delay(1, None);
            assert!(d >= Duration::from_millis(1000));
            assert!(d < Duration::from_millis(1500));
        }
        let d = policy.delay(1, Some(Duration::from_secs(5)));
        assert_eq!(d, Duration::from_secs(5));
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config: FetchConfig =
            serde_json::from_str(r#"{"concurrency": 8, "window": 1000, "format": "csv"}"#)
                .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.window, Duration::from_secs(1));
        assert_eq!(config.format, PayloadFormat::Csv);
        assert_eq!(config.max_retries, 3);
    }
}
