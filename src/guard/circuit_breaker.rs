//! Per-provider circuit breaker (spec §4.9).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::util::unix_now_ms;

const WINDOW_SIZE: usize = 20;
const FAILURE_RATIO_THRESHOLD: f64 = 0.5;
const DEFAULT_COOLDOWN_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Per-provider admission controller tracking failure ratio over the last
/// [`WINDOW_SIZE`] outcomes (spec §4.9 "Closed→Open when failure ratio over
/// a sliding window of N≥20 requests exceeds threshold").
pub struct CircuitBreaker {
    name: String,
    enabled: bool,
    cooldown_ms: u64,
    state: RwLock<CircuitState>,
    outcomes: Mutex<VecDeque<bool>>,
    last_trip_ms: AtomicU64,
    trips_count: AtomicU64,
    half_open_probe_in_flight: RwLock<bool>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: &str, enabled: bool) -> Self {
        Self::with_cooldown(name, enabled, DEFAULT_COOLDOWN_MS)
    }

    #[must_use]
    pub fn with_cooldown(name: &str, enabled: bool, cooldown_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            enabled,
            cooldown_ms,
            state: RwLock::new(CircuitState::Closed),
            outcomes: Mutex::new(VecDeque::with_capacity(WINDOW_SIZE)),
            last_trip_ms: AtomicU64::new(0),
            trips_count: AtomicU64::new(0),
            half_open_probe_in_flight: RwLock::new(false),
        }
    }

    /// Whether a new request may be attempted against this provider. In
    /// `HalfOpen`, at most one probe is admitted at a time.
    pub fn can_proceed(&self) -> bool {
        if !self.enabled {
            return true;
        }
        match *self.state.read() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = unix_now_ms().saturating_sub(self.last_trip_ms.load(Ordering::Relaxed));
                if elapsed >= self.cooldown_ms {
                    self.transition_to(CircuitState::HalfOpen);
                    self.try_claim_probe()
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.try_claim_probe(),
        }
    }

    fn try_claim_probe(&self) -> bool {
        let mut in_flight = self.half_open_probe_in_flight.write();
        if *in_flight {
            false
        } else {
            *in_flight = true;
            true
        }
    }

    pub fn record_success(&self) {
        if !self.enabled {
            return;
        }
        let was_half_open = *self.state.read() == CircuitState::HalfOpen;
        self.push_outcome(true);
        if was_half_open {
            self.transition_to(CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        if !self.enabled {
            return;
        }
        let was_half_open = *self.state.read() == CircuitState::HalfOpen;
        self.push_outcome(false);
        if was_half_open {
            self.transition_to(CircuitState::Open);
            return;
        }
        if self.failure_ratio_exceeded() {
            self.transition_to(CircuitState::Open);
        }
    }

    fn push_outcome(&self, success: bool) {
        let mut outcomes = self.outcomes.lock();
        outcomes.push_back(success);
        if outcomes.len() > WINDOW_SIZE {
            outcomes.pop_front();
        }
    }

    fn failure_ratio_exceeded(&self) -> bool {
        let outcomes = self.outcomes.lock();
        if outcomes.len() < WINDOW_SIZE {
            return false;
        }
        let failures = outcomes.iter().filter(|ok| !**ok).count();
        (failures as f64 / outcomes.len() as f64) > FAILURE_RATIO_THRESHOLD
    }

    fn transition_to(&self, new_state: CircuitState) {
        let mut state = self.state.write();
        if *state == new_state {
            return;
        }
        *state = new_state;
        match new_state {
            CircuitState::Open => {
                self.trips_count.fetch_add(1, Ordering::Relaxed);
                self.last_trip_ms.store(unix_now_ms(), Ordering::Relaxed);
                *self.half_open_probe_in_flight.write() = false;
                self.outcomes.lock().clear();
                tracing::warn!(provider = %self.name, "circuit breaker opened");
            }
            CircuitState::HalfOpen => {
                tracing::debug!(provider = %self.name, "circuit breaker half-open, admitting one probe");
            }
            CircuitState::Closed => {
                *self.half_open_probe_in_flight.write() = false;
                self.outcomes.lock().clear();
                tracing::info!(provider = %self.name, "circuit breaker closed");
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    #[must_use]
    pub fn trips_count(&self) -> u64 {
        self.trips_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip(cb: &CircuitBreaker, failures: usize, successes: usize) {
        for _ in 0..failures {
            cb.record_failure();
        }
        for _ in 0..successes {
            cb.record_success();
        }
    }

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::new("openai", true);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_proceed());
    }

    #[test]
    fn opens_when_failure_ratio_exceeds_threshold_over_window() {
        let cb = CircuitBreaker::new("openai", true);
        trip(&cb, 11, 9);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_proceed());
    }

    #[test]
    fn stays_closed_below_threshold() {
        let cb = CircuitBreaker::new("openai", true);
        trip(&cb, 9, 11);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_cooldown_admits_single_probe() {
        let cb = CircuitBreaker::with_cooldown("openai", true, 0);
        trip(&cb, 11, 9);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.can_proceed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.can_proceed(), "only one probe admitted at a time");
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::with_cooldown("openai", true, 0);
        trip(&cb, 11, 9);
        assert!(cb.can_proceed());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_success_closes() {
        let cb = CircuitBreaker::with_cooldown("openai", true, 0);
        trip(&cb, 11, 9);
        assert!(cb.can_proceed());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn disabled_breaker_always_admits() {
        let cb = CircuitBreaker::new("openai", false);
        trip(&cb, 20, 0);
        assert!(cb.can_proceed());
    }
}
