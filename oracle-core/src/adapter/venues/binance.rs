//! Binance adapter hooks (spec §4.2 table row 1). Grounded on the teacher's
//! `input/collectors/binance.rs`, generalized from a hand-rolled collector struct
//! into a [`VenueHooks`] implementation for the shared driver.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{rest_url, split_known_quote};
use crate::adapter::driver::{CloseClass, VenueAdapter, VenueConfig, VenueHooks};
use crate::adapter::normalize::{normalize_price, ParsedFrame, RawTimestamp, TickerFrame};
use crate::adapter::AdapterEvent;
use crate::error::{OracleError, Result};
use crate::rate_limit::RateLimiter;
use crate::types::{now_ms, Category, PriceObservation};

pub struct BinanceHooks;

impl VenueHooks for BinanceHooks {
    fn map_to_exchange(&self, feed_symbol: &str) -> String {
        feed_symbol.replace('/', "").to_uppercase()
    }

    fn map_from_exchange(&self, exchange_symbol: &str) -> Option<String> {
        let (base, quote) = split_known_quote(exchange_symbol)?;
        Some(format!("{base}/{quote}"))
    }

    fn build_subscribe_message(&self, _exchange_symbols: &[String]) -> Message {
        // The `!ticker@arr` stream pushes every symbol unconditionally; subscribing
        // is purely a client-side filter (spec §4.2: "no per-symbol subscribe required").
        Message::Text(r#"{"method":"SUBSCRIBE","params":[],"id":1}"#.to_string())
    }

    fn build_unsubscribe_message(&self, _exchange_symbols: &[String]) -> Option<Message> {
        None
    }

    fn build_ping_message(&self) -> Option<Message> {
        Some(Message::Text(r#"{"method":"ping"}"#.to_string()))
    }

    fn parse_frame(&self, text: &str) -> ParsedFrame {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return ParsedFrame::Ignore;
        };
        match value {
            Value::Array(items) => {
                let frames: Vec<TickerFrame> = items.iter().filter_map(parse_ticker_object).collect();
                if frames.is_empty() {
                    ParsedFrame::Ignore
                } else {
                    ParsedFrame::Tickers(frames)
                }
            }
            Value::Object(ref obj) if obj.contains_key("result") => ParsedFrame::SubscriptionAck,
            Value::Object(_) => match parse_ticker_object(&value) {
                Some(frame) => ParsedFrame::Ticker(frame),
                None => ParsedFrame::Ignore,
            },
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
        rest_url("https://api.binance.com/api/v3/ticker/24hr", &[("symbol", exchange_symbol)])
    }

    fn parse_rest_response(&self, body: &str, canonical_symbol: &str) -> Result<PriceObservation> {
        let value: Value = serde_json::from_str(body)?;
        if let Some(code) = value.get("code").and_then(Value::as_i64) {
            let message = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown venue error");
            return Err(OracleError::VenueError {
                adapter: "binance".to_string(),
                code: code.to_string(),
                message: message.to_string(),
            });
        }
        let frame = TickerFrame {
            symbol: canonical_symbol.to_string(),
            last_price: value_string(&value, "lastPrice"),
            bid: value.get("bidPrice").and_then(Value::as_str).map(str::to_string),
            ask: value.get("askPrice").and_then(Value::as_str).map(str::to_string),
            volume: value.get("volume").and_then(Value::as_str).map(str::to_string),
            timestamp: None,
        };
        normalize_price(&frame, "binance", now_ms()).ok_or_else(|| OracleError::ParseError {
            adapter: "binance".to_string(),
            message: "REST response missing a usable price".to_string(),
        })
    }
}

fn parse_ticker_object(value: &Value) -> Option<TickerFrame> {
    let symbol = value.get("s")?.as_str()?.to_string();
    let last_price = value.get("c")?.as_str()?.to_string();
    Some(TickerFrame {
        symbol,
        last_price,
        bid: value.get("b").and_then(Value::as_str).map(str::to_string),
        ask: value.get("a").and_then(Value::as_str).map(str::to_string),
        volume: value.get("v").and_then(Value::as_str).map(str::to_string),
        timestamp: value.get("E").and_then(Value::as_f64).map(RawTimestamp::Numeric),
    })
}

fn value_string(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

pub fn new_adapter(
    events: mpsc::Sender<AdapterEvent>,
    rate_limiter: Arc<RateLimiter>,
) -> VenueAdapter<BinanceHooks> {
    let config = VenueConfig {
        name: "binance",
        category: Category::Crypto,
        ws_url: "wss://stream.binance.com:9443/ws/!ticker@arr",
        rest_base_url: "https://api.binance.com",
        ping_interval: Duration::from_secs(30),
        pong_timeout: Duration::from_secs(45),
        supports_websocket: true,
        supports_volume: true,
    };
    VenueAdapter::new(config, BinanceHooks, events, rate_limiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_mapping_round_trips() {
        let hooks = BinanceHooks;
        let exchange = hooks.map_to_exchange("BTC/USDT");
        assert_eq!(exchange, "BTCUSDT");
        assert_eq!(hooks.map_from_exchange(&exchange), Some("BTC/USDT".to_string()));
    }

    #[test]
    fn parses_ticker_array_frame() {
        let hooks = BinanceHooks;
        let frame = r#"[{"s":"BTCUSDT","c":"50000.00","b":"49999.00","a":"50001.00","v":"1000.0","E":1700000000000}]"#;
        match hooks.parse_frame(frame) {
            ParsedFrame::Tickers(frames) => {
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].symbol, "BTCUSDT");
            }
            other => panic!("expected Tickers, got {other:?}"),
        }
    }

    #[test]
    fn classifies_known_close_codes() {
        let hooks = BinanceHooks;
        assert_eq!(hooks.classify_close_code(1000), CloseClass::Normal);
        assert_eq!(hooks.classify_close_code(1006), CloseClass::Abnormal);
    }
}
