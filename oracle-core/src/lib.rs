//! Data-plane library for the oracle: exchange adapters, validation, aggregation,
//! caching, and the data manager that wires them together. The HTTP surface lives
//! in the separate `oracle-server` binary crate; nothing here depends on hyper.

pub mod adapter;
pub mod aggregation;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod data_manager;
pub mod error;
pub mod log_throttle;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod types;
pub mod validator;

pub use adapter::{AdapterCapabilities, AdapterEvent, ExchangeAdapter, VenueHealth};
pub use aggregation::AggregationEngine;
pub use cache::Cache;
pub use config::OracleConfig;
pub use data_manager::{DataManager, ManagerEvent};
pub use error::{OracleError, Result};
pub use registry::AdapterRegistry;
pub use types::{now_ms, AggregatedPrice, Category, FeedId, PriceObservation, VolumeObservation};

use std::sync::Arc;

use tokio::sync::mpsc;

use adapter::venues::{binance, coinbase, cryptocom, kraken, okx, tier2};
pub use rate_limit::RateLimiter;

/// Everything needed to run the data plane: the registry (for `findBestAdapter`
/// lookups), the aggregation engine (for consensus + cache), and the data manager
/// (for lifecycle/health orchestration). Construct with [`build`] and hand the
/// pieces to the HTTP layer.
pub struct OraclePipeline {
    pub registry: Arc<AdapterRegistry>,
    pub aggregation: Arc<AggregationEngine>,
    pub data_manager: Arc<DataManager>,
    pub cache: Arc<Cache>,
    pub rate_limiter: Arc<RateLimiter>,
    #[cfg(feature = "metrics")]
    pub metrics: Arc<metrics::OracleMetrics>,
}

/// Builds the full pipeline and registers and connects the six built-in adapters
/// (spec §4.2: five streaming venues plus one tier-2 pull aggregator). Feed
/// subscriptions are a separate step -- callers drive those via `data_manager`
/// once the HTTP layer (or whatever else) knows which feeds are wanted.
pub async fn build(config: OracleConfig) -> (OraclePipeline, mpsc::Receiver<ManagerEvent>) {
    let registry = Arc::new(AdapterRegistry::new());
    let cache = Arc::new(Cache::new(config.cache_ttl_ms));
    let aggregation = Arc::new(AggregationEngine::new(config.clone(), cache.clone()));
    let rate_limiter = Arc::new(RateLimiter::default());

    let (data_manager, manager_events) =
        DataManager::new(config, registry.clone(), aggregation.clone());
    let data_manager = Arc::new(data_manager);

    let venues: Vec<(&str, mpsc::Receiver<AdapterEvent>, Arc<dyn ExchangeAdapter>)> = {
        let mut built = Vec::new();
        let (tx, rx) = mpsc::channel(1024);
        built.push(("binance", rx, Arc::new(binance::new_adapter(tx, rate_limiter.clone())) as Arc<dyn ExchangeAdapter>));
        let (tx, rx) = mpsc::channel(1024);
        built.push(("coinbase", rx, Arc::new(coinbase::new_adapter(tx, rate_limiter.clone())) as Arc<dyn ExchangeAdapter>));
        let (tx, rx) = mpsc::channel(1024);
        built.push(("kraken", rx, Arc::new(kraken::new_adapter(tx, rate_limiter.clone())) as Arc<dyn ExchangeAdapter>));
        let (tx, rx) = mpsc::channel(1024);
        built.push(("okx", rx, Arc::new(okx::new_adapter(tx, rate_limiter.clone())) as Arc<dyn ExchangeAdapter>));
        let (tx, rx) = mpsc::channel(1024);
        built.push(("cryptocom", rx, Arc::new(cryptocom::new_adapter(tx, rate_limiter.clone())) as Arc<dyn ExchangeAdapter>));
        let (tx, rx) = mpsc::channel(1024);
        built.push(("tier2-aggregator", rx, Arc::new(tier2::new_adapter(tx, rate_limiter.clone())) as Arc<dyn ExchangeAdapter>));
        built
    };

    for (name, events, adapter) in venues {
        if let Err(e) = data_manager.add_data_source(name, adapter, events).await {
            tracing::error!(adapter = name, error = %e, "failed to register built-in adapter");
        }
    }

    #[cfg(feature = "metrics")]
    let metrics = Arc::new(metrics::OracleMetrics::new(
        cache.clone(),
        registry.clone(),
        data_manager.clone(),
    ));

    (
        OraclePipeline {
            registry,
            aggregation,
            data_manager,
            cache,
            rate_limiter,
            #[cfg(feature = "metrics")]
            metrics,
        },
        manager_events,
    )
}
