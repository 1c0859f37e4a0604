//! Process-wide shared state handed to every HTTP handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use oracle_core::{AdapterRegistry, AggregationEngine, Cache, DataManager, OracleConfig, RateLimiter};

/// Everything a request handler needs: the cache it reads from, the registry and
/// data manager it reports health from, and the shutdown flag that gates
/// readiness during the drain window (spec §5 "graceful shutdown").
pub struct AppState {
    pub config: OracleConfig,
    pub registry: Arc<AdapterRegistry>,
    pub aggregation: Arc<AggregationEngine>,
    pub data_manager: Arc<DataManager>,
    pub cache: Arc<Cache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
    pub shutting_down: Arc<AtomicBool>,
    #[cfg(feature = "metrics")]
    pub metrics: Arc<oracle_core::metrics::OracleMetrics>,
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
