//! Per-client token-bucket rate limiter (spec §4.9 "token-bucket per
//! client identity (API key when present, else peer IP)").

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};

use governor::{Quota, RateLimiter as GovernorLimiter};

type KeyedLimiter = GovernorLimiter<
    String,
    governor::state::keyed::DefaultKeyedStateStore<String>,
    governor::clock::DefaultClock,
>;

/// Admits or rejects requests per client identity, continuously refilling
/// (spec §4.9 "bucket refill is continuous").
pub struct ClientRateLimiter {
    enabled: AtomicBool,
    inner: KeyedLimiter,
}

impl ClientRateLimiter {
    /// # Panics
    ///
    /// Never panics: `requests_per_min` of `0` is coerced up to `1`.
    #[must_use]
    pub fn new(requests_per_min: u32, enabled: bool) -> Self {
        let per_minute = NonZeroU32::new(requests_per_min).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute);
        Self {
            enabled: AtomicBool::new(enabled),
            inner: GovernorLimiter::keyed(quota),
        }
    }

    /// Try to admit one request for `client_id`. Returns `Ok(())` on
    /// admission or `Err(retry_after)` with the wait duration otherwise.
    pub fn check(&self, client_id: &str) -> Result<(), std::time::Duration> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.inner.check_key(&client_id.to_string()).map_err(|not_until| {
            not_until.wait_time_from(governor::clock::DefaultClock::default().now())
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_within_quota() {
        let limiter = ClientRateLimiter::new(60, true);
        assert!(limiter.check("client-a").is_ok());
    }

    #[test]
    fn disabled_limiter_always_admits() {
        let limiter = ClientRateLimiter::new(1, false);
        for _ in 0..10 {
            assert!(limiter.check("client-a").is_ok());
        }
    }

    #[test]
    fn distinct_clients_have_independent_buckets() {
        let limiter = ClientRateLimiter::new(1, true);
        assert!(limiter.check("client-a").is_ok());
        assert!(limiter.check("client-b").is_ok());
    }

    #[test]
    fn exceeding_quota_rejects_with_retry_after() {
        let limiter = ClientRateLimiter::new(1, true);
        assert!(limiter.check("client-a").is_ok());
        assert!(limiter.check("client-a").is_err());
    }
}
