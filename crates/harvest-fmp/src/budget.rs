//! Shared request budget enforcing the provider's call-rate ceiling.

use std::collections::VecDeque;
use std::time::Duration;

use harvest_core::FetchConfig;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// Process-wide rate budget shared by every client handle.
///
/// Keeps the grant times of the last `limit` requests. A new grant is issued
/// only once the oldest of them has left the window, so no interval of length
/// `window` ever contains more than `limit` grants, regardless of how many
/// tasks call [`acquire`](Self::acquire) concurrently.
#[derive(Debug)]
pub struct RateBudget {
    limit: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateBudget {
    /// Create a budget of `limit` requests per `window`.
    ///
    /// A zero limit is treated as one.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        let limit = usize::try_from(limit.max(1)).unwrap_or(usize::MAX);
        Self {
            limit,
            window,
            grants: Mutex::new(VecDeque::with_capacity(limit.min(4096))),
        }
    }

    /// Create a budget from the run configuration.
    #[must_use]
    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.requests_per_window, config.window)
    }

    /// Maximum grants per window.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Length of the window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Wait for a slot and consume it.
    ///
    /// This is the only place a request can be held back for rate reasons.
    pub async fn acquire(&self) {
        loop {
            let next_open = {
                let mut grants = self.grants.lock().await;
                let now = Instant::now();
                Self::expire(&mut grants, now, self.window);

                if grants.len() < self.limit {
                    grants.push_back(now);
                    return;
                }

                grants.front().map(|oldest| *oldest + self.window)
            };

            if let Some(at) = next_open {
                let wait = at.saturating_duration_since(Instant::now());
                debug!(
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "Rate budget exhausted, waiting for window"
                );
                sleep_until(at).await;
            }
        }
    }

    /// Slots available right now.
    pub async fn remaining(&self) -> usize {
        let mut grants = self.grants.lock().await;
        Self::expire(&mut grants, Instant::now(), self.window);
        self.limit.saturating_sub(grants.len())
    }

    fn expire(grants: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = grants.front() {
            if now.duration_since(*oldest) >= window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }
}
