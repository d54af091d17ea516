//! Performance Guard (spec §4.9): rate limiting, per-provider circuit
//! breaking, and resource-threshold admission, composed the way the
//! teacher's `Failsafe` wrapper composes its own circuit breaker and rate
//! limiter.

mod circuit_breaker;
mod rate_limiter;
mod resource;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::ClientRateLimiter;
pub use resource::{InFlightTicket, ResourceGuard};

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::PerformanceConfig;
use crate::error::GatewayError;

/// Cross-cutting admission controller shared by every inbound request
/// (spec §4.8 "Middleware": rate limiter → circuit-breaker admission →
/// resource limits).
pub struct PerformanceGuard {
    client_limiter: ClientRateLimiter,
    resource_guard: ResourceGuard,
    circuit_breaker_enabled: bool,
    breakers: RwLock<FxHashMap<String, Arc<CircuitBreaker>>>,
}

impl PerformanceGuard {
    #[must_use]
    pub fn new(config: &PerformanceConfig) -> Self {
        Self {
            client_limiter: ClientRateLimiter::new(
                config.rate_limit_requests_per_min,
                config.rate_limit_enabled,
            ),
            resource_guard: ResourceGuard::new(config.max_in_flight_requests),
            circuit_breaker_enabled: config.circuit_breaker_enabled,
            breakers: RwLock::new(FxHashMap::default()),
        }
    }

    /// # Errors
    ///
    /// [`GatewayError::RateLimited`] if the client's bucket is empty.
    pub fn admit_client(&self, client_id: &str) -> Result<(), GatewayError> {
        self.client_limiter
            .check(client_id)
            .map_err(GatewayError::RateLimited)
    }

    /// # Errors
    ///
    /// [`GatewayError::ResourceExhausted`] if the in-flight cap is reached.
    pub fn admit_resource(&self) -> Result<InFlightTicket<'_>, GatewayError> {
        self.resource_guard
            .try_admit()
            .ok_or_else(|| GatewayError::ResourceExhausted("too many in-flight requests".into()))
    }

    fn breaker_for(&self, provider: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(provider) {
            return Arc::clone(existing);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, self.circuit_breaker_enabled))),
        )
    }

    /// # Errors
    ///
    /// [`GatewayError::CircuitOpen`] if the provider's breaker is tripped.
    pub fn admit_provider(&self, provider: &str) -> Result<(), GatewayError> {
        if self.breaker_for(provider).can_proceed() {
            Ok(())
        } else {
            Err(GatewayError::CircuitOpen(provider.to_string()))
        }
    }

    pub fn record_provider_success(&self, provider: &str) {
        self.breaker_for(provider).record_success();
    }

    pub fn record_provider_failure(&self, provider: &str) {
        self.breaker_for(provider).record_failure();
    }

    #[must_use]
    pub fn circuit_state(&self, provider: &str) -> CircuitState {
        self.breaker_for(provider).state()
    }

    /// Requests currently admitted into the Pipeline (spec §4.9 "Resource
    /// limits"), exposed for the `/status` and `/health` diagnostics.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.resource_guard.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PerformanceConfig {
        PerformanceConfig {
            request_timeout_secs: 30,
            max_request_body_size: 1024,
            metrics_enabled: true,
            rate_limit_enabled: true,
            rate_limit_requests_per_min: 600,
            circuit_breaker_enabled: true,
            max_in_flight_requests: 512,
        }
    }

    #[test]
    fn admits_distinct_providers_independently() {
        let guard = PerformanceGuard::new(&config());
        for _ in 0..11 {
            guard.record_provider_failure("openai");
        }
        assert!(guard.admit_provider("anthropic").is_ok());
        assert!(guard.admit_provider("openai").is_err());
    }

    #[test]
    fn resource_guard_rejects_past_cap() {
        let mut cfg = config();
        cfg.max_in_flight_requests = 1;
        let guard = PerformanceGuard::new(&cfg);
        let _ticket = guard.admit_resource().unwrap();
        assert!(matches!(
            guard.admit_resource(),
            Err(GatewayError::ResourceExhausted(_))
        ));
    }
}
