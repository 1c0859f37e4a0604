//! Connection lifecycle state machine, adapted from the teacher's
//! `services/adapters/src/input/connection.rs`. Generalized from `InstrumentId`
//! tracking to plain symbol strings, and from the teacher's five-state machine to
//! the oracle's six states including the terminal `FailedPermanent` (spec §4.1).

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::ConnectionDefaults;
use crate::error::{OracleError, Result};
use crate::types::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    /// REST-only fallback; streaming disabled (spec §4.1 "Degraded (REST-only)").
    Degraded,
    Closed,
    /// Terminal: max retries exceeded with a non-retryable classification.
    FailedPermanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    NetworkError,
    AuthenticationFailed,
    PongTimeout,
    AbnormalClose,
    VenueSpecific(u16),
    GracefulShutdown,
}

impl DisconnectReason {
    /// Close-code policy from spec §4.1.
    pub fn from_close_code(code: u16) -> Self {
        match code {
            1000 => DisconnectReason::GracefulShutdown,
            1001 => DisconnectReason::PongTimeout,
            1006 => DisconnectReason::AbnormalClose,
            other => DisconnectReason::VenueSpecific(other),
        }
    }

    /// Minimum backoff floor mandated by the close-code policy (spec §4.1: 1006 gets
    /// "a longer delay, at least 2x nominal, floor 5s").
    pub fn min_backoff(&self, nominal: Duration) -> Duration {
        match self {
            DisconnectReason::AbnormalClose => (nominal * 2).max(Duration::from_secs(5)),
            _ => nominal,
        }
    }
}

/// Applies +/-10% jitter to a backoff duration using `rand`, the same anti-thundering-
/// herd technique the teacher's own retry helpers use around reconnect delays.
fn jitter(base: Duration) -> Duration {
    use rand::Rng;
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}

/// Shared connection bookkeeping: state, backoff counter, circuit breaker, and the
/// subscribed-symbol set (spec §5: "mutated only from within that adapter's task").
pub struct ConnectionManager {
    pub adapter_name: String,
    defaults: ConnectionDefaults,
    state: RwLock<ConnectionState>,
    circuit_breaker: CircuitBreaker,
    reconnect_count: AtomicU32,
    backoff_multiplier: AtomicU32,
    last_message_time_ms: AtomicI64,
    subscribed: RwLock<HashSet<String>>,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl ConnectionManager {
    pub fn new(adapter_name: impl Into<String>, defaults: ConnectionDefaults) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            defaults,
            state: RwLock::new(ConnectionState::Idle),
            circuit_breaker: CircuitBreaker::new("connection", CircuitBreakerConfig::default()),
            reconnect_count: AtomicU32::new(0),
            backoff_multiplier: AtomicU32::new(0),
            last_message_time_ms: AtomicI64::new(0),
            subscribed: RwLock::new(HashSet::new()),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, new_state: ConnectionState) {
        let mut guard = self.state.write().await;
        tracing::debug!(adapter = %self.adapter_name, from = ?*guard, to = ?new_state, "connection state transition");
        *guard = new_state;
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.state().await, ConnectionState::Connected)
    }

    pub fn mark_message_received(&self) {
        self.last_message_time_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_message_time(&self) -> i64 {
        self.last_message_time_ms.load(Ordering::Relaxed)
    }

    /// Exponential backoff per spec §4.1: initial 1s, capped, multiplier doubling,
    /// floor adjusted by the disconnect reason's close-code policy. A small random
    /// jitter (+/-10%) is layered on top so that many adapters reconnecting from the
    /// same transient outage don't all retry in lockstep.
    pub fn calculate_backoff(&self, reason: DisconnectReason) -> Duration {
        let multiplier = self.backoff_multiplier.load(Ordering::Relaxed).min(8);
        let base_ms = self.defaults.initial_backoff_ms.saturating_mul(1u64 << multiplier);
        let capped = base_ms.min(self.defaults.max_backoff_ms);
        let jittered = jitter(Duration::from_millis(capped)).min(Duration::from_millis(self.defaults.max_backoff_ms));
        reason.min_backoff(jittered)
    }

    pub fn record_reconnect_attempt(&self) -> u32 {
        self.backoff_multiplier.fetch_add(1, Ordering::Relaxed);
        self.reconnect_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_backoff(&self) {
        self.backoff_multiplier.store(0, Ordering::Relaxed);
        self.reconnect_count.store(0, Ordering::Relaxed);
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    pub fn max_retries(&self) -> u32 {
        self.defaults.max_retries
    }

    pub fn connect_timeout(&self) -> Duration {
        self.defaults.connect_timeout
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub async fn track_symbol(&self, symbol: &str) {
        self.subscribed.write().await.insert(symbol.to_string());
    }

    pub async fn untrack_symbol(&self, symbol: &str) {
        self.subscribed.write().await.remove(symbol);
    }

    pub async fn tracked_symbols(&self) -> HashSet<String> {
        self.subscribed.read().await.clone()
    }

    /// Decide the next lifecycle step after a disconnection, per spec §4.1: graceful
    /// shutdown never reconnects; otherwise schedule backoff unless retries are
    /// exhausted, in which case fall back to Degraded rather than hard-failing.
    pub fn next_after_disconnect(&self, reason: DisconnectReason) -> Result<ConnectionState> {
        if reason == DisconnectReason::GracefulShutdown || self.is_shutting_down() {
            return Ok(ConnectionState::Closed);
        }
        let attempts = self.record_reconnect_attempt();
        if attempts > self.defaults.max_retries {
            return Ok(ConnectionState::Degraded);
        }
        if reason == DisconnectReason::AuthenticationFailed {
            return Err(OracleError::AuthenticationFailed {
                adapter: self.adapter_name.clone(),
            });
        }
        Ok(ConnectionState::Connecting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConnectionManager {
        ConnectionManager::new("test-venue", ConnectionDefaults::default())
    }

    #[tokio::test]
    async fn starts_idle_and_transitions() {
        let m = manager();
        assert_eq!(m.state().await, ConnectionState::Idle);
        m.set_state(ConnectionState::Connecting).await;
        assert_eq!(m.state().await, ConnectionState::Connecting);
        m.set_state(ConnectionState::Connected).await;
        assert!(m.is_connected().await);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let m = manager();
        let first = m.calculate_backoff(DisconnectReason::NetworkError);
        m.record_reconnect_attempt();
        let second = m.calculate_backoff(DisconnectReason::NetworkError);
        assert!(second >= first);
        for _ in 0..20 {
            m.record_reconnect_attempt();
        }
        let capped = m.calculate_backoff(DisconnectReason::NetworkError);
        assert!(capped.as_millis() as u64 <= m.defaults.max_backoff_ms);
    }

    #[test]
    fn abnormal_close_gets_backoff_floor() {
        let m = manager();
        let backoff = m.calculate_backoff(DisconnectReason::AbnormalClose);
        assert!(backoff >= Duration::from_secs(5));
    }

    #[test]
    fn graceful_shutdown_never_reconnects() {
        let m = manager();
        let next = m.next_after_disconnect(DisconnectReason::GracefulShutdown).unwrap();
        assert_eq!(next, ConnectionState::Closed);
    }

    #[test]
    fn exhausted_retries_falls_back_to_degraded_not_failure() {
        let m = manager();
        for _ in 0..m.max_retries() {
            let _ = m.next_after_disconnect(DisconnectReason::NetworkError);
        }
        let next = m.next_after_disconnect(DisconnectReason::NetworkError).unwrap();
        assert_eq!(next, ConnectionState::Degraded);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let jittered = jitter(base);
            assert!(jittered.as_millis() >= 890 && jittered.as_millis() <= 1110);
        }
    }

    #[tokio::test]
    async fn symbol_tracking_round_trips() {
        let m = manager();
        m.track_symbol("BTCUSDT").await;
        assert!(m.tracked_symbols().await.contains("BTCUSDT"));
        m.untrack_symbol("BTCUSDT").await;
        assert!(!m.tracked_symbols().await.contains("BTCUSDT"));
    }
}
