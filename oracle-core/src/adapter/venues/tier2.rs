//! Tier-2 aggregator adapter (spec §4.2: "plus one multi-venue pull adapter").
//!
//! Unlike the five streaming venues this adapter has no WebSocket transport at all
//! -- it is REST-only by construction, polling a small basket of lower-priority
//! exchanges on a fixed interval and re-publishing whichever response lands first
//! per symbol. It implements [`ExchangeAdapter`] directly rather than through
//! [`super::driver::VenueAdapter`] since there is no connection lifecycle or
//! ping/pong liveness to drive -- the "connection" is simply "is the poll loop
//! running". Grounded on the teacher's `gas_price_collector`, which polls a basket
//! of sources on an interval and keeps the most recent result per key.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};

use super::super::{AdapterCapabilities, AdapterEvent, ExchangeAdapter, VenueHealth};
use crate::adapter::normalize::{normalize_price, RawTimestamp, TickerFrame};
use crate::error::{OracleError, Result};
use crate::log_throttle::ErrorCategory;
use crate::rate_limit::RateLimiter;
use crate::types::{now_ms, Category, PriceObservation};

/// One basket member: a name for diagnostics, a URL template with `{symbol}`, and
/// the JSON field names carrying price/bid/ask/volume in its response body.
#[derive(Debug, Clone)]
pub struct TierTwoSource {
    pub name: &'static str,
    pub url_template: &'static str,
    pub price_field: &'static str,
    pub bid_field: Option<&'static str>,
    pub ask_field: Option<&'static str>,
    pub volume_field: Option<&'static str>,
}

/// A small, illustrative basket of lower-priority venues the tier-2 adapter polls
/// in round-robin per symbol. Real deployments would extend this list via config.
pub fn default_sources() -> Vec<TierTwoSource> {
    vec![
        TierTwoSource {
            name: "bitstamp",
            url_template: "https://www.bitstamp.net/api/v2/ticker/{symbol}/",
            price_field: "last",
            bid_field: Some("bid"),
            ask_field: Some("ask"),
            volume_field: Some("volume"),
        },
        TierTwoSource {
            name: "gemini",
            url_template: "https://api.gemini.com/v1/pubticker/{symbol}",
            price_field: "last",
            bid_field: Some("bid"),
            ask_field: Some("ask"),
            volume_field: None,
        },
    ]
}

struct Inner {
    sources: Vec<TierTwoSource>,
    http: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    events: mpsc::Sender<AdapterEvent>,
    tracked: RwLock<HashSet<String>>,
    poll_interval: Duration,
    running: AtomicBool,
}

/// REST-only pull adapter polling a basket of secondary exchanges (spec §4.2).
pub struct Tier2Adapter {
    inner: Arc<Inner>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Tier2Adapter {
    pub fn new(
        sources: Vec<TierTwoSource>,
        poll_interval: Duration,
        events: mpsc::Sender<AdapterEvent>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        let inner = Inner {
            sources,
            http: reqwest::Client::new(),
            rate_limiter,
            events,
            tracked: RwLock::new(HashSet::new()),
            poll_interval,
            running: AtomicBool::new(false),
        };
        Self {
            inner: Arc::new(inner),
            task: Mutex::new(None),
        }
    }
}

/// `{BASE}/{QUOTE}` canonical symbols have no single exchange-native form here
/// since every basket member speaks a slightly different dialect; this adapter
/// maps to a lowercase concatenation (`btcusd`) shared by Bitstamp and Gemini.
fn map_to_exchange(feed_symbol: &str) -> String {
    feed_symbol.replace('/', "").to_lowercase()
}

fn map_from_exchange(exchange_symbol: &str) -> Option<String> {
    super::split_known_quote(&exchange_symbol.to_uppercase())
        .map(|(base, quote)| format!("{base}/{quote}"))
}

impl Inner {
    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            let symbols: Vec<String> = self.tracked.read().await.iter().cloned().collect();
            for symbol in symbols {
                self.poll_symbol(&symbol).await;
            }
        }
    }

    async fn poll_symbol(&self, canonical_symbol: &str) {
        let exchange_symbol = map_to_exchange(canonical_symbol);
        for source in &self.sources {
            if !self.rate_limiter.check(source.name) {
                continue;
            }
            match self.fetch_from(source, &exchange_symbol, canonical_symbol).await {
                Ok(obs) => {
                    let _ = self.events.send(AdapterEvent::PriceUpdate(obs)).await;
                    return;
                }
                Err(e) => {
                    let _ = self
                        .events
                        .send(AdapterEvent::Error { message: e.to_string(), category: ErrorCategory::Transport })
                        .await;
                }
            }
        }
    }

    async fn fetch_from(
        &self,
        source: &TierTwoSource,
        exchange_symbol: &str,
        canonical_symbol: &str,
    ) -> Result<PriceObservation> {
        let url = source.url_template.replace("{symbol}", exchange_symbol);
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OracleError::HttpStatus {
                adapter: source.name.to_string(),
                status: status.as_u16(),
            });
        }
        let value: Value = serde_json::from_str(&body)?;
        let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let last_price = field(source.price_field).ok_or_else(|| OracleError::ParseError {
            adapter: source.name.to_string(),
            message: format!("missing field {}", source.price_field),
        })?;
        let frame = TickerFrame {
            symbol: canonical_symbol.to_string(),
            last_price,
            bid: source.bid_field.and_then(field),
            ask: source.ask_field.and_then(field),
            volume: source.volume_field.and_then(field),
            timestamp: Some(RawTimestamp::Numeric(now_ms() as f64)),
        };
        normalize_price(&frame, source.name, now_ms()).ok_or_else(|| OracleError::ParseError {
            adapter: source.name.to_string(),
            message: "response missing a usable price".to_string(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for Tier2Adapter {
    fn exchange_name(&self) -> &str {
        "tier2-aggregator"
    }

    fn category(&self) -> Category {
        Category::Crypto
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_websocket: false,
            supports_rest: true,
            supports_volume: true,
            supports_order_book: false,
            supported_categories: vec![Category::Crypto],
        }
    }

    async fn connect(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Ok(());
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(Inner::poll_loop(inner)));
        let _ = self
            .inner
            .events
            .send(AdapterEvent::ConnectionChange { connected: true })
            .await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
        }
        let _ = self
            .inner
            .events
            .send(AdapterEvent::ConnectionChange { connected: false })
            .await;
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(OracleError::NotConnected {
                adapter: self.exchange_name().to_string(),
            });
        }
        let valid: Vec<&String> = symbols.iter().filter(|s| self.validate_symbol(s)).collect();
        if valid.is_empty() && !symbols.is_empty() {
            return Err(OracleError::InvalidSymbols {
                adapter: self.exchange_name().to_string(),
            });
        }
        let mut tracked = self.inner.tracked.write().await;
        for symbol in valid {
            tracked.insert(symbol.clone());
        }
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String]) {
        let mut tracked = self.inner.tracked.write().await;
        for symbol in symbols {
            tracked.remove(symbol);
        }
    }

    async fn health_check(&self) -> VenueHealth {
        if self.inner.running.load(Ordering::SeqCst) {
            VenueHealth::Healthy
        } else {
            VenueHealth::Unhealthy
        }
    }

    async fn get_subscriptions(&self) -> Vec<String> {
        self.inner.tracked.read().await.iter().cloned().collect()
    }

    fn validate_symbol(&self, symbol: &str) -> bool {
        map_from_exchange(&map_to_exchange(symbol)).is_some()
    }

    async fn fetch_ticker_rest(&self, symbol: &str) -> Result<PriceObservation> {
        let exchange_symbol = map_to_exchange(symbol);
        let mut last_err = None;
        for source in &self.inner.sources {
            match self.inner.fetch_from(source, &exchange_symbol, symbol).await {
                Ok(obs) => return Ok(obs),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| OracleError::ParseError {
            adapter: self.exchange_name().to_string(),
            message: "no basket source returned a price".to_string(),
        }))
    }
}

pub fn new_adapter(
    events: mpsc::Sender<AdapterEvent>,
    rate_limiter: Arc<RateLimiter>,
) -> Tier2Adapter {
    Tier2Adapter::new(default_sources(), Duration::from_secs(5), events, rate_limiter)
}
