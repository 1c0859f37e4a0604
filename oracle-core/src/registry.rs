//! Adapter registry (spec §4.3): a name-keyed directory of adapters and their
//! health metadata. Registrations happen at process init, so per spec §5 "a simple
//! mutex suffices" -- this uses `RwLock` over a `HashMap`, read-heavy/write-rare,
//! grounded on the teacher's `AdapterRegistry`-shaped usage in `services/adapters`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::adapter::{AdapterCapabilities, ExchangeAdapter, VenueHealth};
use crate::types::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl From<VenueHealth> for HealthStatus {
    fn from(value: VenueHealth) -> Self {
        match value {
            VenueHealth::Healthy => HealthStatus::Healthy,
            VenueHealth::Degraded => HealthStatus::Degraded,
            VenueHealth::Unhealthy => HealthStatus::Unhealthy,
        }
    }
}

/// A registered adapter plus the metadata the registry tracks about it (spec §3
/// `AdapterEntry`). The registry holds a non-owning `Arc` reference to the adapter
/// -- lifecycle (connect/disconnect) belongs to the Data Manager.
pub struct AdapterEntry {
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub registered_at: i64,
    pub is_active: bool,
    pub health_status: HealthStatus,
    pub last_health_check: i64,
}

/// Filter predicate for [`AdapterRegistry::get_filtered`].
#[derive(Debug, Clone, Default)]
pub struct AdapterFilter {
    pub category: Option<Category>,
    pub required_capabilities: Vec<RequiredCapability>,
    pub active_only: bool,
    pub exclude_unhealthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredCapability {
    Websocket,
    Rest,
    Volume,
    OrderBook,
}

fn satisfies(caps: &AdapterCapabilities, required: &RequiredCapability) -> bool {
    match required {
        RequiredCapability::Websocket => caps.supports_websocket,
        RequiredCapability::Rest => caps.supports_rest,
        RequiredCapability::Volume => caps.supports_volume,
        RequiredCapability::OrderBook => caps.supports_order_book,
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub by_category: HashMap<String, usize>,
    pub by_health: HashMap<String, usize>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("adapter '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("adapter '{0}' is not registered")]
    NotFound(String),
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Name-keyed adapter directory (keys lowercased, spec §4.3).
#[derive(Default)]
pub struct AdapterRegistry {
    entries: RwLock<HashMap<String, AdapterEntry>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        name: &str,
        adapter: Arc<dyn ExchangeAdapter>,
    ) -> Result<(), RegistryError> {
        let key = name.to_lowercase();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(key));
        }
        entries.insert(
            key,
            AdapterEntry {
                adapter,
                registered_at: now_ms(),
                is_active: true,
                health_status: HealthStatus::Unknown,
                last_health_check: now_ms(),
            },
        );
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let key = name.to_lowercase();
        self.entries
            .write()
            .await
            .remove(&key)
            .map(|_| ())
            .ok_or(RegistryError::NotFound(key))
    }

    pub async fn has(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(&name.to_lowercase())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn ExchangeAdapter>> {
        self.entries
            .read()
            .await
            .get(&name.to_lowercase())
            .map(|e| e.adapter.clone())
    }

    pub async fn set_active(&self, name: &str, active: bool) -> Result<(), RegistryError> {
        let key = name.to_lowercase();
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&key).ok_or(RegistryError::NotFound(key))?;
        entry.is_active = active;
        Ok(())
    }

    pub async fn update_health_status(
        &self,
        name: &str,
        status: HealthStatus,
    ) -> Result<(), RegistryError> {
        let key = name.to_lowercase();
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&key).ok_or(RegistryError::NotFound(key))?;
        entry.health_status = status;
        entry.last_health_check = now_ms();
        Ok(())
    }

    pub async fn names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Supports filtering by category, capability subset, active flag, and health
    /// (spec §4.3 `getFiltered`).
    pub async fn get_filtered(&self, filter: &AdapterFilter) -> Vec<Arc<dyn ExchangeAdapter>> {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| {
                if filter.active_only && !entry.is_active {
                    return false;
                }
                if filter.exclude_unhealthy && entry.health_status == HealthStatus::Unhealthy {
                    return false;
                }
                if let Some(category) = filter.category {
                    if entry.adapter.category() != category {
                        return false;
                    }
                }
                let caps = entry.adapter.capabilities();
                filter
                    .required_capabilities
                    .iter()
                    .all(|cap| satisfies(&caps, cap))
            })
            .map(|entry| entry.adapter.clone())
            .collect()
    }

    /// Among active adapters of `category` whose `validate_symbol(symbol)` holds
    /// and whose health is not unhealthy: prefer a healthy one, fall back to a
    /// degraded one, otherwise `None` (spec §4.3 `findBestAdapter`).
    pub async fn find_best_adapter(
        &self,
        symbol: &str,
        category: Category,
    ) -> Option<Arc<dyn ExchangeAdapter>> {
        let entries = self.entries.read().await;
        let candidates: Vec<&AdapterEntry> = entries
            .values()
            .filter(|e| {
                e.is_active
                    && e.adapter.category() == category
                    && e.adapter.validate_symbol(symbol)
                    && e.health_status != HealthStatus::Unhealthy
            })
            .collect();
        candidates
            .iter()
            .find(|e| e.health_status == HealthStatus::Healthy)
            .or_else(|| candidates.iter().find(|e| e.health_status == HealthStatus::Degraded))
            .map(|e| e.adapter.clone())
    }

    pub async fn get_stats(&self) -> RegistryStats {
        let entries = self.entries.read().await;
        let mut stats = RegistryStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries.values() {
            if entry.is_active {
                stats.active += 1;
            }
            let category_key = format!("{:?}", entry.adapter.category());
            *stats.by_category.entry(category_key).or_insert(0) += 1;
            let health_key = format!("{:?}", entry.health_status);
            *stats.by_health.entry(health_key).or_insert(0) += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterEvent;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct StubAdapter {
        name: String,
        category: Category,
        symbols: Vec<String>,
    }

    #[async_trait]
    impl ExchangeAdapter for StubAdapter {
        fn exchange_name(&self) -> &str {
            &self.name
        }
        fn category(&self) -> Category {
            self.category
        }
        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities {
                supports_websocket: true,
                supports_rest: true,
                supports_volume: true,
                supports_order_book: false,
                supported_categories: vec![self.category],
            }
        }
        async fn connect(&self) -> crate::error::Result<()> {
            Ok(())
        }
        async fn disconnect(&self) {}
        async fn subscribe(&self, _symbols: &[String]) -> crate::error::Result<()> {
            Ok(())
        }
        async fn unsubscribe(&self, _symbols: &[String]) {}
        async fn health_check(&self) -> VenueHealth {
            VenueHealth::Healthy
        }
        async fn get_subscriptions(&self) -> Vec<String> {
            Vec::new()
        }
        fn validate_symbol(&self, symbol: &str) -> bool {
            self.symbols.iter().any(|s| s == symbol)
        }
        async fn fetch_ticker_rest(&self, _symbol: &str) -> crate::error::Result<PriceObsForTest> {
            unreachable!("not exercised in registry tests")
        }
    }

    // Local alias so the stub's trait impl type-checks without importing the real
    // PriceObservation just for an unreachable method body.
    type PriceObsForTest = crate::types::PriceObservation;

    fn stub(name: &str, category: Category, symbols: &[&str]) -> Arc<dyn ExchangeAdapter> {
        Arc::new(StubAdapter {
            name: name.to_string(),
            category,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let registry = AdapterRegistry::new();
        registry
            .register("Binance", stub("binance", Category::Crypto, &["BTC/USDT"]))
            .await
            .unwrap();
        assert!(registry.has("binance").await);
        assert!(registry.get("BINANCE").await.is_some());
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let registry = AdapterRegistry::new();
        registry
            .register("binance", stub("binance", Category::Crypto, &[]))
            .await
            .unwrap();
        let err = registry
            .register("binance", stub("binance", Category::Crypto, &[]))
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered("binance".to_string()));
    }

    #[tokio::test]
    async fn find_best_adapter_prefers_healthy_over_degraded() {
        let registry = AdapterRegistry::new();
        registry
            .register("degraded-venue", stub("degraded-venue", Category::Crypto, &["BTC/USDT"]))
            .await
            .unwrap();
        registry
            .register("healthy-venue", stub("healthy-venue", Category::Crypto, &["BTC/USDT"]))
            .await
            .unwrap();
        registry
            .update_health_status("degraded-venue", HealthStatus::Degraded)
            .await
            .unwrap();
        registry
            .update_health_status("healthy-venue", HealthStatus::Healthy)
            .await
            .unwrap();

        let best = registry.find_best_adapter("BTC/USDT", Category::Crypto).await.unwrap();
        assert_eq!(best.exchange_name(), "healthy-venue");
    }

    #[tokio::test]
    async fn find_best_adapter_falls_back_to_degraded() {
        let registry = AdapterRegistry::new();
        registry
            .register("only-degraded", stub("only-degraded", Category::Crypto, &["BTC/USDT"]))
            .await
            .unwrap();
        registry
            .update_health_status("only-degraded", HealthStatus::Degraded)
            .await
            .unwrap();
        let best = registry.find_best_adapter("BTC/USDT", Category::Crypto).await;
        assert!(best.is_some());
    }

    #[tokio::test]
    async fn find_best_adapter_excludes_unhealthy() {
        let registry = AdapterRegistry::new();
        registry
            .register("broken", stub("broken", Category::Crypto, &["BTC/USDT"]))
            .await
            .unwrap();
        registry
            .update_health_status("broken", HealthStatus::Unhealthy)
            .await
            .unwrap();
        assert!(registry.find_best_adapter("BTC/USDT", Category::Crypto).await.is_none());
    }

    #[tokio::test]
    async fn filters_by_category_and_active_flag() {
        let registry = AdapterRegistry::new();
        registry
            .register("fx-venue", stub("fx-venue", Category::Forex, &[]))
            .await
            .unwrap();
        registry
            .register("crypto-venue", stub("crypto-venue", Category::Crypto, &[]))
            .await
            .unwrap();
        registry.set_active("fx-venue", false).await.unwrap();

        let filter = AdapterFilter {
            category: Some(Category::Crypto),
            active_only: true,
            ..Default::default()
        };
        let found = registry.get_filtered(&filter).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].exchange_name(), "crypto-venue");
    }

    #[tokio::test]
    async fn stats_counts_totals_and_breakdowns() {
        let registry = AdapterRegistry::new();
        registry
            .register("a", stub("a", Category::Crypto, &[]))
            .await
            .unwrap();
        registry
            .register("b", stub("b", Category::Forex, &[]))
            .await
            .unwrap();
        let stats = registry.get_stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 2);
    }
}
