//! Per-adapter circuit breaker, adapted from the teacher's
//! `services/adapters/src/circuit_breaker.rs`. Spec §4.8 asks for a simpler
//! single-trial HalfOpen than the teacher's `success_threshold`-gated version, so
//! that parameter is dropped in favor of "one success closes, one failure reopens."

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Failure accounting for one adapter (spec §4.8, §8 invariant 4: no observation
/// escapes to the aggregator while Open).
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    open_until: RwLock<Option<Instant>>,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    trips: AtomicU64,
    /// Claimed by whichever `should_attempt` call first observes HalfOpen, so only
    /// one trial dispatch is admitted at a time (spec §4.8 "allow a single trial
    /// dispatch"); cleared again on `on_success`/`on_failure`/`reset`.
    half_open_trial_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            open_until: RwLock::new(None),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            trips: AtomicU64::new(0),
            half_open_trial_in_flight: AtomicBool::new(false),
        }
    }

    /// Whether dispatch through this adapter is currently permitted. Transitions
    /// Open -> HalfOpen when the cooldown has elapsed.
    pub fn should_attempt(&self) -> bool {
        let current = *self.state.read().unwrap();
        match current {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self
                .half_open_trial_in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
            CircuitState::Open => {
                let ready = self
                    .open_until
                    .read()
                    .unwrap()
                    .map(|t| Instant::now() >= t)
                    .unwrap_or(false);
                if ready {
                    *self.state.write().unwrap() = CircuitState::HalfOpen;
                    self.half_open_trial_in_flight.store(true, Ordering::SeqCst);
                    tracing::debug!(adapter = %self.name, "circuit breaker: Open -> HalfOpen");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Relaxed);
                self.half_open_trial_in_flight.store(false, Ordering::SeqCst);
                tracing::info!(adapter = %self.name, "circuit breaker: HalfOpen -> Closed");
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::HalfOpen => {
                self.trip(&mut state);
            }
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count >= self.config.failure_threshold {
                    self.trip(&mut state);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, state: &mut CircuitState) {
        *state = CircuitState::Open;
        *self.open_until.write().unwrap() = Some(Instant::now() + self.config.cooldown);
        self.half_open_trial_in_flight.store(false, Ordering::SeqCst);
        self.trips.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(adapter = %self.name, "circuit breaker tripped: Open");
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap()
    }

    pub fn reset(&self) {
        *self.state.write().unwrap() = CircuitState::Closed;
        self.failure_count.store(0, Ordering::Relaxed);
        *self.open_until.write().unwrap() = None;
        self.half_open_trial_in_flight.store(false, Ordering::SeqCst);
    }

    pub fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }
}

pub type SharedCircuitBreaker = Arc<CircuitBreaker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("coinbase", CircuitBreakerConfig::default());
        for _ in 0..5 {
            cb.on_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_attempt());
    }

    #[test]
    fn half_open_single_trial_success_closes() {
        let cb = CircuitBreaker::new(
            "kraken",
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(0),
            },
        );
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.should_attempt());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(
            "okx",
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(0),
            },
        );
        cb.on_failure();
        assert!(cb.should_attempt());
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_admits_only_one_concurrent_trial() {
        let cb = CircuitBreaker::new(
            "kraken",
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(0),
            },
        );
        cb.on_failure();
        assert!(cb.should_attempt(), "first caller claims the trial");
        assert!(!cb.should_attempt(), "a second concurrent caller must not also dispatch");
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.should_attempt(), "trial slot is free again once resolved");
    }

    #[test]
    fn success_in_closed_resets_counter() {
        let cb = CircuitBreaker::new("binance", CircuitBreakerConfig::default());
        cb.on_failure();
        cb.on_failure();
        cb.on_success();
        for _ in 0..4 {
            cb.on_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
