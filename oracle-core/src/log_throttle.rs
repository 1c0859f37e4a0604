//! Per-adapter-per-error-category rate-limited warning log (spec §4.1: "Warning log
//! messages are per-adapter-per-error-category rate-limited to at most one per 30s").
//!
//! The teacher scatters ad hoc `tracing::warn!` call sites guarded by module-level
//! maps; spec §9 "Global mutable state" forbids that pattern here, so this is a small
//! struct owned per-adapter rather than a process-global table.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    VenueError,
    VenuePermanent,
    Validation,
}

/// Owned by a single adapter instance; never shared across adapters.
pub struct RateLimitedLog {
    interval: Duration,
    last_emitted: Mutex<HashMap<ErrorCategory, Instant>>,
}

impl RateLimitedLog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    /// True if a warning in this category may be emitted now; updates the bucket's
    /// last-emitted time as a side effect if it returns true.
    pub fn should_emit(&self, category: ErrorCategory) -> bool {
        let mut map = self.last_emitted.lock().unwrap();
        let now = Instant::now();
        match map.get(&category) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                map.insert(category, now);
                true
            }
        }
    }
}

impl Default for RateLimitedLog {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_emit_in_a_category_always_allowed() {
        let log = RateLimitedLog::default();
        assert!(log.should_emit(ErrorCategory::Transport));
    }

    #[test]
    fn second_emit_within_interval_is_suppressed() {
        let log = RateLimitedLog::new(Duration::from_secs(30));
        assert!(log.should_emit(ErrorCategory::Protocol));
        assert!(!log.should_emit(ErrorCategory::Protocol));
    }

    #[test]
    fn categories_are_independent() {
        let log = RateLimitedLog::new(Duration::from_secs(30));
        assert!(log.should_emit(ErrorCategory::Transport));
        assert!(log.should_emit(ErrorCategory::VenueError));
    }

    #[test]
    fn allows_again_after_interval_elapses() {
        let log = RateLimitedLog::new(Duration::from_millis(10));
        assert!(log.should_emit(ErrorCategory::Validation));
        std::thread::sleep(Duration::from_millis(20));
        assert!(log.should_emit(ErrorCategory::Validation));
    }
}
