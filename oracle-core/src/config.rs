//! Env-driven configuration, following the teacher's `BaseAdapterConfig`/`from_env()`
//! pattern (`services/adapters/src/config.rs`): read once at startup, validate eagerly,
//! never mutate afterward.

use std::env;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Global data-plane tunables shared by every adapter and the aggregation pipeline.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Freshness gate bound (spec §3, §4.4): observations older than this are dropped.
    pub max_data_age_ms: i64,
    /// Minimum confidence admitted by the data manager's freshness gate (spec §4.4).
    pub min_confidence: f64,
    /// Minimum distinct sources required before the aggregator emits a consensus (spec §4.6).
    pub min_sources: usize,
    /// Aggregation window length (spec §4.6 "last 10s").
    pub aggregation_window_ms: i64,
    /// Max observations retained per source within the window.
    pub max_observations_per_source: usize,
    /// Cache TTL (spec §4.7, default 1000ms).
    pub cache_ttl_ms: i64,
    /// Health monitor tick (spec §4.4, default 30s).
    pub health_check_interval_ms: u64,
    /// Unhealthy threshold: no update for this long (spec §4.4, default 60s).
    pub stale_unhealthy_ms: i64,
    /// Unhealthy threshold: latency above this (spec §4.4, default 5s).
    pub unhealthy_latency_ms: i64,
    /// Outlier detection threshold as a fraction (spec §4.5, default 0.05).
    pub outlier_threshold: f64,
    /// Valid price range (spec §4.5, defaults 0.01..1_000_000).
    pub price_range_min: f64,
    pub price_range_max: f64,
    /// Graceful shutdown cleanup deadline (spec §5, default 30s).
    pub shutdown_deadline: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_data_age_ms: 2000,
            min_confidence: 0.3,
            min_sources: 2,
            aggregation_window_ms: 10_000,
            max_observations_per_source: 20,
            cache_ttl_ms: 1000,
            health_check_interval_ms: 30_000,
            stale_unhealthy_ms: 60_000,
            unhealthy_latency_ms: 5_000,
            outlier_threshold: 0.05,
            price_range_min: 0.01,
            price_range_max: 1_000_000.0,
            shutdown_deadline: Duration::from_secs(30),
        }
    }
}

impl OracleConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_data_age_ms: env_or("ORACLE_MAX_DATA_AGE_MS", defaults.max_data_age_ms),
            min_confidence: env_or("ORACLE_MIN_CONFIDENCE", defaults.min_confidence),
            min_sources: env_or("ORACLE_MIN_SOURCES", defaults.min_sources),
            aggregation_window_ms: env_or(
                "ORACLE_AGGREGATION_WINDOW_MS",
                defaults.aggregation_window_ms,
            ),
            max_observations_per_source: env_or(
                "ORACLE_MAX_OBS_PER_SOURCE",
                defaults.max_observations_per_source,
            ),
            cache_ttl_ms: env_or("ORACLE_CACHE_TTL_MS", defaults.cache_ttl_ms),
            health_check_interval_ms: env_or(
                "ORACLE_HEALTH_CHECK_INTERVAL_MS",
                defaults.health_check_interval_ms,
            ),
            stale_unhealthy_ms: env_or("ORACLE_STALE_UNHEALTHY_MS", defaults.stale_unhealthy_ms),
            unhealthy_latency_ms: env_or(
                "ORACLE_UNHEALTHY_LATENCY_MS",
                defaults.unhealthy_latency_ms,
            ),
            outlier_threshold: env_or("ORACLE_OUTLIER_THRESHOLD", defaults.outlier_threshold),
            price_range_min: env_or("ORACLE_PRICE_RANGE_MIN", defaults.price_range_min),
            price_range_max: env_or("ORACLE_PRICE_RANGE_MAX", defaults.price_range_max),
            shutdown_deadline: Duration::from_secs(env_or(
                "ORACLE_SHUTDOWN_DEADLINE_SECS",
                defaults.shutdown_deadline.as_secs(),
            )),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_data_age_ms <= 0 {
            return Err("ORACLE_MAX_DATA_AGE_MS must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err("ORACLE_MIN_CONFIDENCE must be within [0,1]".into());
        }
        if self.min_sources == 0 {
            return Err("ORACLE_MIN_SOURCES must be at least 1".into());
        }
        if self.cache_ttl_ms <= 0 {
            return Err("ORACLE_CACHE_TTL_MS must be positive".into());
        }
        if self.price_range_min >= self.price_range_max {
            return Err("ORACLE_PRICE_RANGE_MIN must be less than ORACLE_PRICE_RANGE_MAX".into());
        }
        Ok(())
    }
}

/// Shared connection-lifecycle defaults, overridable per venue (spec §4.1, §4.2).
#[derive(Debug, Clone)]
pub struct ConnectionDefaults {
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub rest_timeout: Duration,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_retries: 10,
            initial_backoff_ms: 1000,
            // Spec §4.1: adapter-level exponential backoff is "capped at 5 min".
            max_backoff_ms: 300_000,
            rest_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionDefaults {
    pub fn from_env(prefix: &str) -> Self {
        let defaults = Self::default();
        Self {
            connect_timeout: Duration::from_millis(env_or(
                &format!("{prefix}_CONNECT_TIMEOUT_MS"),
                defaults.connect_timeout.as_millis() as u64,
            )),
            max_retries: env_or(&format!("{prefix}_MAX_RETRIES"), defaults.max_retries),
            initial_backoff_ms: env_or(
                &format!("{prefix}_INITIAL_BACKOFF_MS"),
                defaults.initial_backoff_ms,
            ),
            max_backoff_ms: env_or(&format!("{prefix}_MAX_BACKOFF_MS"), defaults.max_backoff_ms),
            rest_timeout: Duration::from_millis(env_or(
                &format!("{prefix}_REST_TIMEOUT_MS"),
                defaults.rest_timeout.as_millis() as u64,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn default_config_validates() {
        assert!(OracleConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_price_range() {
        let mut cfg = OracleConfig::default();
        cfg.price_range_min = 100.0;
        cfg.price_range_max = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn from_env_reads_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("ORACLE_MIN_SOURCES", "3");
        let cfg = OracleConfig::from_env();
        assert_eq!(cfg.min_sources, 3);
        env::remove_var("ORACLE_MIN_SOURCES");
    }

    #[test]
    fn connection_defaults_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("BINANCE_MAX_RETRIES", "4");
        let cd = ConnectionDefaults::from_env("BINANCE");
        assert_eq!(cd.max_retries, 4);
        env::remove_var("BINANCE_MAX_RETRIES");
    }
}
