//! Time-bounded cache from feed to latest aggregated result (spec §4.7). TTL is
//! short -- it exists to collapse bursts of identical requests, not to retain
//! data -- so a plain `DashMap` keyed by [`FeedId`] with a per-entry write time is
//! sufficient; no background eviction task is needed since every read checks TTL.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::types::{AggregatedPrice, FeedId};

struct Entry {
    value: AggregatedPrice,
    written_at_ms: i64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Concurrent `FeedId -> AggregatedPrice` mapping with TTL-gated reads (spec §4.7).
pub struct Cache {
    entries: DashMap<FeedId, Entry>,
    ttl_ms: i64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached value iff `now - write_time <= ttl`; otherwise a miss,
    /// even if a (now stale) entry is still present.
    pub fn get(&self, feed: &FeedId, now_ms: i64) -> Option<AggregatedPrice> {
        let hit = self
            .entries
            .get(feed)
            .filter(|e| now_ms - e.written_at_ms <= self.ttl_ms)
            .map(|e| e.value.clone());
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    pub fn set(&self, feed: FeedId, value: AggregatedPrice, now_ms: i64) {
        self.entries.insert(
            feed,
            Entry {
                value,
                written_at_ms: now_ms,
            },
        );
    }

    pub fn invalidate(&self, feed: &FeedId) {
        self.entries.remove(feed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn price(symbol: &str, value: f64, ts: i64) -> AggregatedPrice {
        AggregatedPrice {
            symbol: symbol.to_string(),
            price: value,
            timestamp: ts,
            sources: vec!["binance".to_string(), "coinbase".to_string()],
            confidence: 0.9,
            consensus_score: 1.0,
            stale: false,
        }
    }

    #[test]
    fn hit_within_ttl() {
        let cache = Cache::new(1000);
        let feed = FeedId::new(Category::Crypto, "BTC/USDT").unwrap();
        cache.set(feed.clone(), price("BTC/USDT", 50000.0, 0), 0);
        assert!(cache.get(&feed, 500).is_some());
    }

    #[test]
    fn miss_past_ttl() {
        let cache = Cache::new(1000);
        let feed = FeedId::new(Category::Crypto, "BTC/USDT").unwrap();
        cache.set(feed.clone(), price("BTC/USDT", 50000.0, 0), 0);
        assert!(cache.get(&feed, 1001).is_none());
    }

    #[test]
    fn overwrite_replaces_value_and_resets_age() {
        let cache = Cache::new(1000);
        let feed = FeedId::new(Category::Crypto, "BTC/USDT").unwrap();
        cache.set(feed.clone(), price("BTC/USDT", 50000.0, 0), 0);
        cache.set(feed.clone(), price("BTC/USDT", 50500.0, 500), 500);
        let hit = cache.get(&feed, 600).unwrap();
        assert_eq!(hit.price, 50500.0);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = Cache::new(1000);
        let feed = FeedId::new(Category::Crypto, "BTC/USDT").unwrap();
        cache.set(feed.clone(), price("BTC/USDT", 50000.0, 0), 0);
        cache.get(&feed, 500);
        cache.get(&feed, 5000);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
