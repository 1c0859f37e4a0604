//! Coinbase adapter hooks (spec §4.2 table row 2). Grounded on the teacher's
//! `coinbase_adapter/src/adapter.rs`, in particular its `type`-discriminated
//! message dispatch and RFC-3339 timestamp handling.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::adapter::driver::{CloseClass, VenueAdapter, VenueConfig, VenueHooks};
use crate::adapter::normalize::{normalize_price, ParsedFrame, RawTimestamp, TickerFrame};
use crate::adapter::AdapterEvent;
use crate::error::{OracleError, Result};
use crate::rate_limit::RateLimiter;
use crate::types::{now_ms, Category, PriceObservation};

pub struct CoinbaseHooks;

impl VenueHooks for CoinbaseHooks {
    fn map_to_exchange(&self, feed_symbol: &str) -> String {
        feed_symbol.replace('/', "-").to_uppercase()
    }

    fn map_from_exchange(&self, exchange_symbol: &str) -> Option<String> {
        let mut parts = exchange_symbol.split('-');
        let base = parts.next()?;
        let quote = parts.next()?;
        if parts.next().is_some() || base.is_empty() || quote.is_empty() {
            return None;
        }
        Some(format!("{}/{}", base.to_uppercase(), quote.to_uppercase()))
    }

    fn build_subscribe_message(&self, exchange_symbols: &[String]) -> Message {
        let body = serde_json::json!({
            "type": "subscribe",
            "product_ids": exchange_symbols,
            "channels": ["ticker"],
        });
        Message::Text(body.to_string())
    }

    fn build_unsubscribe_message(&self, exchange_symbols: &[String]) -> Option<Message> {
        let body = serde_json::json!({
            "type": "unsubscribe",
            "product_ids": exchange_symbols,
            "channels": ["ticker"],
        });
        Some(Message::Text(body.to_string()))
    }

    fn build_ping_message(&self) -> Option<Message> {
        Some(Message::Text(r#"{"type":"ping"}"#.to_string()))
    }

    fn parse_frame(&self, text: &str) -> ParsedFrame {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return ParsedFrame::Ignore;
        };
        match value.get("type").and_then(Value::as_str) {
            Some("ticker") => match parse_ticker_object(&value) {
                Some(frame) => ParsedFrame::Ticker(frame),
                None => ParsedFrame::Ignore,
            },
            Some("subscriptions") => ParsedFrame::SubscriptionAck,
            Some("error") => {
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                ParsedFrame::Error(message)
            }
            Some("heartbeat") | Some("pong") => ParsedFrame::Heartbeat,
            _ => ParsedFrame::Ignore,
        }
    }

    fn classify_close_code(&self, code: u16) -> CloseClass {
        match code {
            1000 => CloseClass::Normal,
            1001 => CloseClass::PongTimeout,
            1006 => CloseClass::Abnormal,
            _ => CloseClass::VenueSpecific { extended_backoff: false },
        }
    }

    fn rest_ticker_url(&self, exchange_symbol: &str) -> String {
        let mut url = url::Url::parse("https://api.exchange.coinbase.com/products/")
            .expect("coinbase REST base URL is a fixed, valid constant");
        url.path_segments_mut()
            .expect("https URL always has path segments")
            .push(exchange_symbol)
            .push("ticker");
        url.to_string()
    }

    fn parse_rest_response(&self, body: &str, canonical_symbol: &str) -> Result<PriceObservation> {
        let value: Value = serde_json::from_str(body)?;
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return Err(OracleError::VenueError {
                adapter: "coinbase".to_string(),
                code: "error".to_string(),
                message: message.to_string(),
            });
        }
        let frame = TickerFrame {
            symbol: canonical_symbol.to_string(),
            last_price: value.get("price").and_then(Value::as_str).unwrap_or("").to_string(),
            bid: value.get("bid").and_then(Value::as_str).map(str::to_string),
            ask: value.get("ask").and_then(Value::as_str).map(str::to_string),
            volume: value.get("volume").and_then(Value::as_str).map(str::to_string),
            timestamp: value
                .get("time")
                .and_then(Value::as_str)
                .map(|s| RawTimestamp::Iso(s.to_string())),
        };
        normalize_price(&frame, "coinbase", now_ms()).ok_or_else(|| OracleError::ParseError {
            adapter: "coinbase".to_string(),
            message: "REST response missing a usable price".to_string(),
        })
    }
}

fn parse_ticker_object(value: &Value) -> Option<TickerFrame> {
    let symbol = value.get("product_id")?.as_str()?.to_string();
    let last_price = value.get("price")?.as_str()?.to_string();
    Some(TickerFrame {
        symbol,
        last_price,
        bid: value.get("best_bid").and_then(Value::as_str).map(str::to_string),
        ask: value.get("best_ask").and_then(Value::as_str).map(str::to_string),
        volume: value.get("volume_24h").and_then(Value::as_str).map(str::to_string),
        timestamp: value
            .get("time")
            .and_then(Value::as_str)
            .map(|s| RawTimestamp::Iso(s.to_string())),
    })
}

pub fn new_adapter(
    events: mpsc::Sender<AdapterEvent>,
    rate_limiter: Arc<RateLimiter>,
) -> VenueAdapter<CoinbaseHooks> {
    let config = VenueConfig {
        name: "coinbase",
        category: Category::Crypto,
        ws_url: "wss://ws-feed.exchange.coinbase.com",
        rest_base_url: "https://api.exchange.coinbase.com",
        ping_interval: Duration::from_secs(25),
        pong_timeout: Duration::from_secs(20),
        supports_websocket: true,
        supports_volume: true,
    };
    VenueAdapter::new(config, CoinbaseHooks, events, rate_limiter)
}
