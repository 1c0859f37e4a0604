//! Optional Prometheus metrics surface (feature `metrics`), mirroring the
//! teacher's `AdapterMetrics` counters (`services/adapters/src/metrics.rs`), which
//! register a handful of `IntGauge`/`IntCounter` instruments against a shared
//! `prometheus::Registry` and render them as text on scrape. Generalized here to
//! the oracle's cache/registry/circuit-breaker counters (spec SPEC_FULL.md §F).
//!
//! These are pull-based gauges: rather than threading increment calls through
//! every call site that already tracks its own counters (`Cache`, `AdapterRegistry`,
//! `CircuitBreaker`), the gauges are refreshed from those existing counters at
//! scrape time, the same way the teacher's health-check binary computes its JSON
//! body from live state on each request rather than maintaining a parallel tally.

use std::sync::Arc;

use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::Cache;
use crate::data_manager::DataManager;
use crate::registry::AdapterRegistry;

/// Registers and renders the oracle's Prometheus gauges. One instance per process;
/// constructed alongside the rest of [`crate::OraclePipeline`] in [`crate::build`].
pub struct OracleMetrics {
    registry: Registry,
    cache: Arc<Cache>,
    adapter_registry: Arc<AdapterRegistry>,
    data_manager: Arc<DataManager>,

    cache_hits: IntGauge,
    cache_misses: IntGauge,
    cache_entries: IntGauge,
    sources_total: IntGauge,
    sources_active: IntGauge,
    sources_by_health: IntGaugeVec,
    source_age_ms: IntGaugeVec,
    source_consecutive_failures: IntGaugeVec,
}

impl OracleMetrics {
    pub fn new(cache: Arc<Cache>, adapter_registry: Arc<AdapterRegistry>, data_manager: Arc<DataManager>) -> Self {
        let registry = Registry::new();

        let cache_hits = IntGauge::new("oracle_cache_hits_total", "Cache reads that landed within TTL").unwrap();
        let cache_misses = IntGauge::new("oracle_cache_misses_total", "Cache reads past TTL or absent").unwrap();
        let cache_entries = IntGauge::new("oracle_cache_entries", "Live cache entries").unwrap();
        let sources_total = IntGauge::new("oracle_sources_total", "Registered adapters").unwrap();
        let sources_active = IntGauge::new("oracle_sources_active", "Adapters marked active").unwrap();
        let sources_by_health = IntGaugeVec::new(
            Opts::new("oracle_sources_by_health", "Registered adapters by health status"),
            &["health"],
        )
        .unwrap();
        let source_age_ms = IntGaugeVec::new(
            Opts::new("oracle_source_data_age_ms", "Milliseconds since the adapter's last observation"),
            &["source"],
        )
        .unwrap();
        let source_consecutive_failures = IntGaugeVec::new(
            Opts::new("oracle_source_consecutive_failures", "Consecutive freshness-gate/error failures per source"),
            &["source"],
        )
        .unwrap();

        for metric in [&cache_hits, &cache_misses, &cache_entries, &sources_total, &sources_active] {
            registry.register(Box::new(metric.clone())).unwrap();
        }
        registry.register(Box::new(sources_by_health.clone())).unwrap();
        registry.register(Box::new(source_age_ms.clone())).unwrap();
        registry.register(Box::new(source_consecutive_failures.clone())).unwrap();

        Self {
            registry,
            cache,
            adapter_registry,
            data_manager,
            cache_hits,
            cache_misses,
            cache_entries,
            sources_total,
            sources_active,
            sources_by_health,
            source_age_ms,
            source_consecutive_failures,
        }
    }

    /// Refreshes every gauge from its live source of truth, then encodes the
    /// registry in Prometheus text exposition format.
    pub async fn render(&self) -> String {
        let cache_stats = self.cache.stats();
        self.cache_hits.set(cache_stats.hits as i64);
        self.cache_misses.set(cache_stats.misses as i64);
        self.cache_entries.set(self.cache.len() as i64);

        let registry_stats = self.adapter_registry.get_stats().await;
        self.sources_total.set(registry_stats.total as i64);
        self.sources_active.set(registry_stats.active as i64);
        for (health, count) in &registry_stats.by_health {
            self.sources_by_health.with_label_values(&[health]).set(*count as i64);
        }

        for report in self.data_manager.connection_health().await {
            self.source_age_ms.with_label_values(&[&report.name]).set(report.age_ms);
            self.source_consecutive_failures
                .with_label_values(&[&report.name])
                .set(report.consecutive_failures as i64);
        }

        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer).expect("prometheus encoding is infallible for gauge families");
        String::from_utf8(buffer).expect("prometheus TextEncoder always emits valid utf8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleConfig;
    use crate::AggregationEngine;

    #[tokio::test]
    async fn renders_prometheus_text_with_cache_counters() {
        let cache = Arc::new(Cache::new(1000));
        let adapter_registry = Arc::new(AdapterRegistry::new());
        let aggregation = Arc::new(AggregationEngine::new(OracleConfig::default(), cache.clone()));
        let (data_manager, _rx) = DataManager::new(OracleConfig::default(), adapter_registry.clone(), aggregation);
        let data_manager = Arc::new(data_manager);

        let feed = crate::types::FeedId::new(crate::types::Category::Crypto, "BTC/USDT").unwrap();
        cache.get(&feed, 0);

        let metrics = OracleMetrics::new(cache, adapter_registry, data_manager);
        let rendered = metrics.render().await;
        assert!(rendered.contains("oracle_cache_misses_total 1"));
        assert!(rendered.contains("oracle_sources_total 0"));
    }
}
