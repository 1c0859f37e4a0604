//! Kraken adapter hooks (spec §4.2 table row 3). Grounded on the teacher's
//! `input/collectors/kraken.rs`, which already models the `[chanId, data,
//! channelName, pair]` array ticker frame and the exponential reconnect pattern
//! this driver reuses generically.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{rest_url, split_known_quote};
use crate::adapter::driver::{CloseClass, VenueAdapter, VenueConfig, VenueHooks};
use crate::adapter::normalize::{normalize_price, ParsedFrame, TickerFrame};
use crate::adapter::AdapterEvent;
use crate::error::{OracleError, Result};
use crate::rate_limit::RateLimiter;
use crate::types::{now_ms, Category, PriceObservation};

pub struct KrakenHooks;

impl VenueHooks for KrakenHooks {
    fn map_to_exchange(&self, feed_symbol: &str) -> String {
        feed_symbol.replace('/', "").replace("BTC", "XBT").to_uppercase()
    }

    fn map_from_exchange(&self, exchange_symbol: &str) -> Option<String> {
        let de_aliased = exchange_symbol.replace("XBT", "BTC");
        // Ticker frames carry the pair with its separator already (e.g. "XBT/USD");
        // the subscribe-time form has none (e.g. "XBTUSD"). Handle both.
        if let Some((base, quote)) = de_aliased.split_once('/') {
            if !base.is_empty() && !quote.is_empty() {
                return Some(format!("{}/{}", base.to_uppercase(), quote.to_uppercase()));
            }
            return None;
        }
        let (base, quote) = split_known_quote(&de_aliased)?;
        Some(format!("{base}/{quote}"))
    }

    fn build_subscribe_message(&self, exchange_symbols: &[String]) -> Message {
        let body = serde_json::json!({
            "event": "subscribe",
            "pair": exchange_symbols,
            "subscription": {"name": "ticker"},
        });
        Message::Text(body.to_string())
    }

    fn build_unsubscribe_message(&self, exchange_symbols: &[String]) -> Option<Message> {
        let body = serde_json::json!({
            "event": "unsubscribe",
            "pair": exchange_symbols,
            "subscription": {"name": "ticker"},
        });
        Some(Message::Text(body.to_string()))
    }

    fn build_ping_message(&self) -> Option<Message> {
        Some(Message::Text(r#"{"event":"ping"}"#.to_string()))
    }

    fn parse_frame(&self, text: &str) -> ParsedFrame {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return ParsedFrame::Ignore;
        };
        match value {
            Value::Array(ref arr) if arr.len() >= 4 && arr[2].as_str() == Some("ticker") => {
                match parse_ticker_array(arr) {
                    Some(frame) => ParsedFrame::Ticker(frame),
                    None => ParsedFrame::Ignore,
                }
            }
            Value::Object(ref obj) => match obj.get("event").and_then(Value::as_str) {
                Some("systemStatus") => ParsedFrame::Ignore,
                Some("subscriptionStatus") => match obj.get("status").and_then(Value::as_str) {
                    Some("subscribed") => ParsedFrame::SubscriptionAck,
                    Some("error") => ParsedFrame::Error(
                        obj.get("errorMessage")
                            .and_then(Value::as_str)
                            .unwrap_or("subscription error")
                            .to_string(),
                    ),
                    _ => ParsedFrame::Ignore,
                },
                Some("heartbeat") | Some("pong") => ParsedFrame::Heartbeat,
                _ => ParsedFrame::Ignore,
            },
            _ => ParsedFrame::Ignore,
        }
    }

    fn classify_close_code(&self, code: u16) -> CloseClass {
        match code {
            1000 => CloseClass::Normal,
            1001 => CloseClass::PongTimeout,
            1006 => CloseClass::Abnormal,
            503 => CloseClass::VenueSpecific { extended_backoff: true },
            _ => CloseClass::VenueSpecific { extended_backoff: false },
        }
    }

    fn rest_ticker_url(&self, exchange_symbol: &str) -> String {
        rest_url("https://api.kraken.com/0/public/Ticker", &[("pair", exchange_symbol)])
    }

    fn parse_rest_response(&self, body: &str, canonical_symbol: &str) -> Result<PriceObservation> {
        let value: Value = serde_json::from_str(body)?;
        if let Some(errors) = value.get("error").and_then(Value::as_array) {
            if let Some(first) = errors.first().and_then(Value::as_str) {
                return Err(OracleError::VenueError {
                    adapter: "kraken".to_string(),
                    code: "error".to_string(),
                    message: first.to_string(),
                });
            }
        }
        let result = value
            .get("result")
            .and_then(Value::as_object)
            .and_then(|m| m.values().next())
            .ok_or_else(|| OracleError::ParseError {
                adapter: "kraken".to_string(),
                message: "missing result payload".to_string(),
            })?;
        let frame = TickerFrame {
            symbol: canonical_symbol.to_string(),
            last_price: array_field(result, "c", 0),
            bid: Some(array_field(result, "b", 0)),
            ask: Some(array_field(result, "a", 0)),
            volume: Some(array_field(result, "v", 1)),
            timestamp: None,
        };
        normalize_price(&frame, "kraken", now_ms()).ok_or_else(|| OracleError::ParseError {
            adapter: "kraken".to_string(),
            message: "REST response missing a usable price".to_string(),
        })
    }
}

fn parse_ticker_array(arr: &[Value]) -> Option<TickerFrame> {
    let data = arr.get(1)?.as_object()?;
    let pair = arr.get(3)?.as_str()?.to_string();
    Some(TickerFrame {
        symbol: pair,
        last_price: array_field(data, "c", 0),
        bid: Some(array_field(data, "b", 0)),
        ask: Some(array_field(data, "a", 0)),
        volume: Some(array_field(data, "v", 1)),
        timestamp: None,
    })
}

fn array_field(obj: &serde_json::Map<String, Value>, key: &str, index: usize) -> String {
    obj.get(key)
        .and_then(Value::as_array)
        .and_then(|a| a.get(index))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

pub fn new_adapter(
    events: mpsc::Sender<AdapterEvent>,
    rate_limiter: Arc<RateLimiter>,
) -> VenueAdapter<KrakenHooks> {
    let config = VenueConfig {
        name: "kraken",
        category: Category::Crypto,
        ws_url: "wss://ws.kraken.com",
        rest_base_url: "https://api.kraken.com",
        ping_interval: Duration::from_secs(45),
        pong_timeout: Duration::from_secs(68),
        supports_websocket: true,
        supports_volume: true,
    };
    VenueAdapter::new(config, KrakenHooks, events, rate_limiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btc_aliases_to_xbt() {
        let hooks = KrakenHooks;
        assert_eq!(hooks.map_to_exchange("BTC/USD"), "XBTUSD");
    }

    #[test]
    fn reverse_mapping_de_aliases_xbt() {
        let hooks = KrakenHooks;
        assert_eq!(hooks.map_from_exchange("XBTUSD"), Some("BTC/USD".to_string()));
    }

    #[test]
    fn reverse_mapping_handles_ticker_frame_separator_form() {
        let hooks = KrakenHooks;
        assert_eq!(hooks.map_from_exchange("XBT/USD"), Some("BTC/USD".to_string()));
    }

    #[test]
    fn parses_four_tuple_ticker_frame() {
        let hooks = KrakenHooks;
        let text = r#"[336,{"c":["50000.0","1"],"b":["49999.0","1","1"],"a":["50001.0","1","1"],"v":["100","1000"]},"ticker","XBT/USD"]"#;
        match hooks.parse_frame(text) {
            ParsedFrame::Ticker(frame) => {
                assert_eq!(frame.symbol, "XBT/USD");
                assert_eq!(frame.last_price, "50000.0");
            }
            other => panic!("expected Ticker, got {other:?}"),
        }
    }

    #[test]
    fn close_code_503_gets_extended_backoff() {
        let hooks = KrakenHooks;
        assert_eq!(
            hooks.classify_close_code(503),
            CloseClass::VenueSpecific { extended_backoff: true }
        );
    }
}
