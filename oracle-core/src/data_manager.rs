//! Data Manager (spec §4.4): owns the subscription/connection lifecycle for every
//! registered adapter, applies the freshness gate to inbound observations before
//! handing them to the aggregation engine, and runs the 30s health monitor tick
//! that drives reconnect/failover decisions. Grounded on the teacher's
//! `AdapterService` orchestration loop (`services/adapters/src/output/adapter_service.rs`):
//! one coordinating task fed by a single mpsc channel of adapter events, rather
//! than callback registration per adapter.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration};

use crate::adapter::{AdapterEvent, ExchangeAdapter, VenueHealth};
use crate::aggregation::AggregationEngine;
use crate::config::OracleConfig;
use crate::error::Result;
use crate::log_throttle::RateLimitedLog;
use crate::registry::{AdapterRegistry, HealthStatus};
use crate::types::{now_ms, Category};

/// Per-adapter freshness/health bookkeeping the data manager tracks independently
/// of the registry's coarser `HealthStatus` (spec §4.4 `getConnectionHealth` /
/// `getDataFreshness`).
#[derive(Debug, Clone)]
struct SourceHealth {
    last_update_ms: i64,
    last_latency_ms: i64,
    consecutive_failures: u32,
}

impl SourceHealth {
    fn fresh(now: i64) -> Self {
        Self {
            last_update_ms: now,
            last_latency_ms: 0,
            consecutive_failures: 0,
        }
    }
}

/// A lifecycle/health transition the data manager emits as it observes adapters
/// (spec §4.4: sourceHealthy/sourceUnhealthy/sourceFailover/sourceDisconnected/sourceConnected).
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    SourceConnected { name: String },
    SourceDisconnected { name: String },
    SourceHealthy { name: String },
    SourceUnhealthy { name: String },
    SourceFailover { from: String, to: String },
}

/// Connection/freshness snapshot returned by [`DataManager::connection_health`].
#[derive(Debug, Clone)]
pub struct ConnectionHealthReport {
    pub name: String,
    pub healthy: bool,
    pub last_update_ms: i64,
    pub age_ms: i64,
    pub consecutive_failures: u32,
}

/// Orchestrates every registered [`ExchangeAdapter`]: connects them, routes their
/// events through the freshness gate into the [`AggregationEngine`], and runs the
/// periodic health sweep (spec §4.4).
pub struct DataManager {
    config: OracleConfig,
    registry: Arc<AdapterRegistry>,
    aggregation: Arc<AggregationEngine>,
    health: RwLock<HashMap<String, SourceHealth>>,
    events_tx: mpsc::Sender<ManagerEvent>,
    /// One rate-limited log per adapter, lazily created, so `AdapterEvent::Error`
    /// warnings are throttled per adapter per category rather than globally
    /// (spec §4.1: "at most one per 30s").
    error_logs: RwLock<HashMap<String, RateLimitedLog>>,
}

impl DataManager {
    pub fn new(
        config: OracleConfig,
        registry: Arc<AdapterRegistry>,
        aggregation: Arc<AggregationEngine>,
    ) -> (Self, mpsc::Receiver<ManagerEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        (
            Self {
                config,
                registry,
                aggregation,
                health: RwLock::new(HashMap::new()),
                events_tx,
                error_logs: RwLock::new(HashMap::new()),
            },
            events_rx,
        )
    }

    /// Connects `adapter` and begins feeding its events into the pipeline. Each
    /// adapter gets its own forwarding task draining its `AdapterEvent` channel, so
    /// one venue's backlog can never block another's (spec §5 "per-adapter task").
    pub async fn add_data_source(
        self: &Arc<Self>,
        name: &str,
        adapter: Arc<dyn ExchangeAdapter>,
        mut adapter_events: mpsc::Receiver<AdapterEvent>,
    ) -> Result<()> {
        self.registry.register(name, adapter.clone()).await.map_err(|e| {
            crate::error::OracleError::Internal(e.to_string())
        })?;
        adapter.connect().await?;
        self.health
            .write()
            .await
            .insert(name.to_string(), SourceHealth::fresh(now_ms()));
        let _ = self.events_tx.send(ManagerEvent::SourceConnected { name: name.to_string() }).await;

        let manager = self.clone();
        let source_name = name.to_string();
        tokio::spawn(async move {
            while let Some(event) = adapter_events.recv().await {
                manager.handle_adapter_event(&source_name, event).await;
            }
        });
        Ok(())
    }

    pub async fn remove_data_source(&self, name: &str) -> Result<()> {
        if let Some(adapter) = self.registry.get(name).await {
            adapter.disconnect().await;
        }
        self.registry
            .unregister(name)
            .await
            .map_err(|e| crate::error::OracleError::Internal(e.to_string()))?;
        self.health.write().await.remove(name);
        self.error_logs.write().await.remove(name);
        let _ = self
            .events_tx
            .send(ManagerEvent::SourceDisconnected { name: name.to_string() })
            .await;
        Ok(())
    }

    /// Routes a feed subscription to every adapter whose category matches, not just
    /// the single best one (spec §4.4: "for every connected adapter whose category
    /// matches, calls subscribe(...) and records the subscription") -- consensus
    /// needs `min_sources` independent venues, so fanning out here is what lets the
    /// aggregator ever see more than one source per feed.
    pub async fn subscribe_to_feed(&self, category: Category, symbol: &str) -> Result<()> {
        let filter = crate::registry::AdapterFilter {
            category: Some(category),
            active_only: true,
            ..Default::default()
        };
        let adapters = self.registry.get_filtered(&filter).await;
        let matching: Vec<_> = adapters
            .into_iter()
            .filter(|a| a.validate_symbol(symbol))
            .collect();
        if matching.is_empty() {
            return Err(crate::error::OracleError::InvalidSymbols {
                adapter: "data-manager".to_string(),
            });
        }
        for adapter in matching {
            if let Err(e) = adapter.subscribe(&[symbol.to_string()]).await {
                tracing::warn!(adapter = adapter.exchange_name(), symbol, error = %e, "subscribe failed on one adapter; continuing with others");
            }
        }
        Ok(())
    }

    pub async fn unsubscribe_from_feed(&self, name: &str, symbol: &str) -> Result<()> {
        if let Some(adapter) = self.registry.get(name).await {
            adapter.unsubscribe(&[symbol.to_string()]).await;
        }
        Ok(())
    }

    /// Applies the freshness gate (spec §3, §4.4: drop observations older than
    /// `max_data_age_ms` or below `min_confidence` before they reach aggregation)
    /// and routes connection-state/error events into health bookkeeping.
    async fn handle_adapter_event(&self, source: &str, event: AdapterEvent) {
        match event {
            AdapterEvent::PriceUpdate(observation) => {
                let now = now_ms();
                let age = observation.age_ms(now);
                if age > self.config.max_data_age_ms || observation.confidence < self.config.min_confidence {
                    tracing::debug!(source, age, confidence = observation.confidence, "dropping observation at freshness gate");
                    return;
                }
                {
                    let mut health = self.health.write().await;
                    let entry = health.entry(source.to_string()).or_insert_with(|| SourceHealth::fresh(now));
                    entry.last_update_ms = now;
                    entry.last_latency_ms = age;
                    entry.consecutive_failures = 0;
                }
                let category = self
                    .registry
                    .get(source)
                    .await
                    .map(|a| a.category())
                    .unwrap_or(Category::Crypto);
                self.aggregation.ingest(category, observation).await;
            }
            AdapterEvent::ConnectionChange { connected } => {
                if connected {
                    let _ = self
                        .events_tx
                        .send(ManagerEvent::SourceConnected { name: source.to_string() })
                        .await;
                } else {
                    let _ = self
                        .events_tx
                        .send(ManagerEvent::SourceDisconnected { name: source.to_string() })
                        .await;
                }
            }
            AdapterEvent::StreamingExhausted => {
                tracing::warn!(source, "streaming reconnect attempts exhausted; falling back to REST");
                let _ = self
                    .events_tx
                    .send(ManagerEvent::SourceFailover {
                        from: source.to_string(),
                        to: "rest-fallback".to_string(),
                    })
                    .await;
            }
            AdapterEvent::Error { message, category } => {
                let should_emit = {
                    let mut logs = self.error_logs.write().await;
                    logs.entry(source.to_string())
                        .or_insert_with(RateLimitedLog::default)
                        .should_emit(category)
                };
                if should_emit {
                    tracing::warn!(source, message, ?category, "adapter reported an error");
                } else {
                    tracing::debug!(source, message, ?category, "adapter reported an error (rate-limited)");
                }
                let mut health = self.health.write().await;
                let entry = health.entry(source.to_string()).or_insert_with(|| SourceHealth::fresh(now_ms()));
                entry.consecutive_failures += 1;
            }
        }
    }

    /// Connection/freshness report for every tracked source (spec §4.4
    /// `getConnectionHealth` / `getDataFreshness`).
    pub async fn connection_health(&self) -> Vec<ConnectionHealthReport> {
        let now = now_ms();
        let health = self.health.read().await;
        health
            .iter()
            .map(|(name, h)| ConnectionHealthReport {
                name: name.clone(),
                healthy: now - h.last_update_ms <= self.config.stale_unhealthy_ms
                    && h.last_latency_ms <= self.config.unhealthy_latency_ms,
                last_update_ms: h.last_update_ms,
                age_ms: now - h.last_update_ms,
                consecutive_failures: h.consecutive_failures,
            })
            .collect()
    }

    /// Runs forever, ticking every `health_check_interval_ms` (spec §4.4 "30s health
    /// monitor"): invokes each adapter's own health check when it has one, cross-
    /// checks staleness/latency thresholds, and updates the registry's coarse
    /// `HealthStatus` -- which in turn feeds `findBestAdapter`'s failover ordering.
    pub async fn run_health_monitor(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_millis(self.config.health_check_interval_ms));
        loop {
            ticker.tick().await;
            self.sweep_health().await;
        }
    }

    /// Disconnects every registered adapter (spec §5 "graceful shutdown"): each
    /// adapter's own `disconnect` stops its reconnect loop and marks it closed
    /// rather than degraded, so the process doesn't log reconnect noise while
    /// hyper drains in-flight requests.
    pub async fn shutdown(&self) {
        for name in self.registry.names().await {
            if let Some(adapter) = self.registry.get(&name).await {
                adapter.disconnect().await;
            }
        }
    }

    async fn sweep_health(&self) {
        let now = now_ms();
        for name in self.registry.names().await {
            let Some(adapter) = self.registry.get(&name).await else {
                continue;
            };
            let venue_health = adapter.health_check().await;
            let (stale, latency_ok) = {
                let health = self.health.read().await;
                match health.get(&name) {
                    Some(h) => (
                        now - h.last_update_ms > self.config.stale_unhealthy_ms,
                        h.last_latency_ms <= self.config.unhealthy_latency_ms,
                    ),
                    None => (true, true),
                }
            };

            let status = if stale || venue_health == VenueHealth::Unhealthy {
                HealthStatus::Unhealthy
            } else if !latency_ok || venue_health == VenueHealth::Degraded {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };

            let _ = self.registry.update_health_status(&name, status).await;

            match status {
                HealthStatus::Unhealthy => {
                    let _ = self.events_tx.send(ManagerEvent::SourceUnhealthy { name: name.clone() }).await;
                }
                HealthStatus::Healthy => {
                    let _ = self.events_tx.send(ManagerEvent::SourceHealthy { name: name.clone() }).await;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::types::PriceObservation;
    use async_trait::async_trait;
    use crate::adapter::AdapterCapabilities;

    struct StubAdapter {
        name: String,
    }

    #[async_trait]
    impl ExchangeAdapter for StubAdapter {
        fn exchange_name(&self) -> &str {
            &self.name
        }
        fn category(&self) -> Category {
            Category::Crypto
        }
        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities {
                supports_websocket: true,
                supports_rest: true,
                supports_volume: true,
                supports_order_book: false,
                supported_categories: vec![Category::Crypto],
            }
        }
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) {}
        async fn subscribe(&self, _symbols: &[String]) -> Result<()> {
            Ok(())
        }
        async fn unsubscribe(&self, _symbols: &[String]) {}
        async fn health_check(&self) -> VenueHealth {
            VenueHealth::Healthy
        }
        async fn get_subscriptions(&self) -> Vec<String> {
            Vec::new()
        }
        fn validate_symbol(&self, _symbol: &str) -> bool {
            true
        }
        async fn fetch_ticker_rest(&self, _symbol: &str) -> Result<PriceObservation> {
            unreachable!("not exercised")
        }
    }

    fn manager() -> Arc<DataManager> {
        let registry = Arc::new(AdapterRegistry::new());
        let cache = Arc::new(Cache::new(1000));
        let aggregation = Arc::new(AggregationEngine::new(OracleConfig::default(), cache));
        let (manager, _rx) = DataManager::new(OracleConfig::default(), registry, aggregation);
        Arc::new(manager)
    }

    #[tokio::test]
    async fn add_data_source_registers_and_connects() {
        let manager = manager();
        let (_tx, rx) = mpsc::channel(8);
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(StubAdapter { name: "binance".into() });
        manager.add_data_source("binance", adapter, rx).await.unwrap();
        let health = manager.connection_health().await;
        assert_eq!(health.len(), 1);
        assert!(health[0].healthy);
    }

    #[tokio::test]
    async fn stale_observation_is_dropped_at_freshness_gate() {
        let manager = manager();
        let (tx, rx) = mpsc::channel(8);
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(StubAdapter { name: "binance".into() });
        manager.add_data_source("binance", adapter, rx).await.unwrap();

        let stale = PriceObservation {
            symbol: "BTC/USDT".to_string(),
            price: 50000.0,
            timestamp: now_ms() - 60_000,
            source: "binance".to_string(),
            volume: None,
            confidence: 0.9,
        };
        tx.send(AdapterEvent::PriceUpdate(stale)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.aggregation.source_count("BTC/USDT").await, 0);
    }

    #[tokio::test]
    async fn repeated_errors_in_one_category_increment_failures_but_throttle_logging() {
        let manager = manager();
        let (tx, rx) = mpsc::channel(8);
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(StubAdapter { name: "binance".into() });
        manager.add_data_source("binance", adapter, rx).await.unwrap();

        for _ in 0..3 {
            tx.send(AdapterEvent::Error {
                message: "boom".to_string(),
                category: crate::log_throttle::ErrorCategory::Transport,
            })
            .await
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let health = manager.connection_health().await;
        assert_eq!(health[0].consecutive_failures, 3);
        let logs = manager.error_logs.read().await;
        assert!(logs.contains_key("binance"));
    }

    #[tokio::test]
    async fn streaming_exhausted_emits_source_failover() {
        let registry = Arc::new(AdapterRegistry::new());
        let cache = Arc::new(Cache::new(1000));
        let aggregation = Arc::new(AggregationEngine::new(OracleConfig::default(), cache));
        let (manager, mut events) = DataManager::new(OracleConfig::default(), registry, aggregation);
        let manager = Arc::new(manager);

        let (tx, rx) = mpsc::channel(8);
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(StubAdapter { name: "coinbase".into() });
        manager.add_data_source("coinbase", adapter, rx).await.unwrap();
        // Drain the SourceConnected event add_data_source already emitted.
        assert_eq!(events.recv().await, Some(ManagerEvent::SourceConnected { name: "coinbase".into() }));

        tx.send(AdapterEvent::StreamingExhausted).await.unwrap();
        let event = events.recv().await.expect("expected a manager event");
        assert_eq!(
            event,
            ManagerEvent::SourceFailover {
                from: "coinbase".to_string(),
                to: "rest-fallback".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn remove_data_source_unregisters() {
        let manager = manager();
        let (_tx, rx) = mpsc::channel(8);
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(StubAdapter { name: "binance".into() });
        manager.add_data_source("binance", adapter, rx).await.unwrap();
        manager.remove_data_source("binance").await.unwrap();
        assert!(!manager.registry.has("binance").await);
    }
}
