//! Per-connector rate-limit quota tracking.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// In-memory quota gate in front of one connector.
///
/// Exhausted budget is reported as a denial, not an error; the coordinator
/// treats a denial like a rate-limited response and advances or backs off per
/// its retry policy.
#[derive(Clone)]
pub struct ConnectorQuota {
    limiter: Arc<DirectRateLimiter>,
}

impl ConnectorQuota {
    /// Allow `limit` calls per `window`, with bursts up to the full limit.
    pub fn new(window: Duration, limit: u32) -> Self {
        let quota = quota_from_window(window, limit);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Try to take one unit of budget.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let limit = NonZeroU32::new(limit.max(1)).expect("limit is clamped to at least 1");
    let per_call = window
        .checked_div(limit.get())
        .filter(|d| !d.is_zero())
        .unwrap_or(Duration::from_millis(1));

    Quota::with_period(per_call)
        .expect("per-call period is non-zero")
        .allow_burst(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_up_to_burst_then_denies() {
        let quota = ConnectorQuota::new(Duration::from_secs(60), 3);

        assert!(quota.try_acquire());
        assert!(quota.try_acquire());
        assert!(quota.try_acquire());
        assert!(!quota.try_acquire());
    }

    #[test]
    fn zero_limit_is_clamped_to_one() {
        let quota = ConnectorQuota::new(Duration::from_secs(60), 0);
        assert!(quota.try_acquire());
        assert!(!quota.try_acquire());
    }
}
