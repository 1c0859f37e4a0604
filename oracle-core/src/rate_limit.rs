//! REST-fallback rate limiting, adapted from the teacher's
//! `services/adapters/src/rate_limit.rs`. Keyed by adapter name instead of `VenueId`
//! since the oracle has no internal venue-id enum shared across crates.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovernorLimiter};
use nonzero_ext::nonzero;

type DirectLimiter = GovernorLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Per-adapter REST call throttling (spec SPEC_FULL §G — prevents the Degraded-mode
/// polling loop from hammering a venue's REST API). Also records outcomes into a
/// [`RateLimitTracker`] so `/metrics` can surface REST-fallback health per adapter.
pub struct RateLimiter {
    limiters: HashMap<String, Arc<DirectLimiter>>,
    default_quota: Quota,
    tracker: RateLimitTracker,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limiters: HashMap::new(),
            default_quota: Quota::per_minute(nonzero!(60u32)),
            tracker: RateLimitTracker::default(),
        }
    }

    pub fn configure(&mut self, adapter: &str, requests_per_minute: u32) {
        let quota = Quota::per_minute(
            NonZeroU32::new(requests_per_minute).unwrap_or(nonzero!(60u32)),
        );
        self.limiters
            .insert(adapter.to_string(), Arc::new(GovernorLimiter::direct(quota)));
    }

    fn limiter_for(&self, adapter: &str) -> Arc<DirectLimiter> {
        self.limiters
            .get(adapter)
            .cloned()
            .unwrap_or_else(|| Arc::new(GovernorLimiter::direct(self.default_quota)))
    }

    /// Non-blocking check: true if a request may proceed right now.
    pub fn check(&self, adapter: &str) -> bool {
        let admitted = self.limiter_for(adapter).check().is_ok();
        self.tracker.record(adapter, admitted, !admitted);
        admitted
    }

    /// Blocking wait until capacity is available.
    pub async fn wait(&self, adapter: &str) {
        self.limiter_for(adapter).until_ready().await
    }

    /// Observed admit/reject counts for `adapter`, for the `/metrics` surface.
    pub fn stats(&self, adapter: &str) -> Option<RequestStats> {
        self.tracker.stats(adapter)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        let mut limiter = Self::new();
        limiter.configure("binance", 1200);
        limiter.configure("coinbase", 600);
        limiter.configure("kraken", 180);
        limiter.configure("okx", 600);
        limiter.configure("cryptocom", 300);
        limiter
    }
}

/// Observed request outcomes per adapter, for the health surface and diagnostics.
#[derive(Debug, Default, Clone)]
pub struct RequestStats {
    pub total: u64,
    pub successful: u64,
    pub rate_limited: u64,
}

impl RequestStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.successful as f64 / self.total as f64
    }
}

/// Concurrent request-outcome tracker, mirroring the teacher's `RateLimitTracker`.
#[derive(Default)]
pub struct RateLimitTracker {
    stats: DashMap<String, RequestStats>,
}

impl RateLimitTracker {
    pub fn record(&self, adapter: &str, success: bool, rate_limited: bool) {
        let mut entry = self.stats.entry(adapter.to_string()).or_default();
        entry.total += 1;
        if success {
            entry.successful += 1;
        }
        if rate_limited {
            entry.rate_limited += 1;
        }
    }

    pub fn stats(&self, adapter: &str) -> Option<RequestStats> {
        self.stats.get(adapter).map(|r| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limiter_admits_first_request_per_adapter() {
        let limiter = RateLimiter::default();
        assert!(limiter.check("binance"));
        assert!(limiter.check("kraken"));
    }

    #[test]
    fn tracker_computes_success_rate() {
        let tracker = RateLimitTracker::default();
        tracker.record("okx", true, false);
        tracker.record("okx", false, true);
        let stats = tracker.stats("okx").unwrap();
        assert_eq!(stats.total, 2);
        assert!((stats.success_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unconfigured_adapter_uses_default_quota() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("unknown-venue"));
    }

    #[test]
    fn wait_blocks_once_quota_is_exhausted() {
        let mut limiter = RateLimiter::new();
        limiter.configure("throttled", 1);
        assert!(limiter.check("throttled"));
        assert!(!limiter.check("throttled"));

        let mut task = tokio_test::task::spawn(limiter.wait("throttled"));
        tokio_test::assert_pending!(task.poll());
    }
}
