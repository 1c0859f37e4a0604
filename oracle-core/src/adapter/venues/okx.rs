//! OKX adapter hooks (spec §4.2 table row 4). The liveness contract is the
//! exception among the five venues: OKX never answers pings, enforces its own
//! 30s idle timeout, and closes with code 4004 under normal operation (spec §4.1
//! "Liveness (ping/pong)" exception clause).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::rest_url;
use crate::adapter::driver::{CloseClass, VenueAdapter, VenueConfig, VenueHooks};
use crate::adapter::normalize::{normalize_price, ParsedFrame, RawTimestamp, TickerFrame};
use crate::adapter::AdapterEvent;
use crate::error::{OracleError, Result};
use crate::rate_limit::RateLimiter;
use crate::types::{now_ms, Category, PriceObservation};

pub struct OkxHooks;

impl VenueHooks for OkxHooks {
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
        let args: Vec<Value> = exchange_symbols
            .iter()
            .map(|s| serde_json::json!({"channel": "tickers", "instId": s}))
            .collect();
        let body = serde_json::json!({"op": "subscribe", "args": args});
        Message::Text(body.to_string())
    }

    fn build_unsubscribe_message(&self, exchange_symbols: &[String]) -> Option<Message> {
        let args: Vec<Value> = exchange_symbols
            .iter()
            .map(|s| serde_json::json!({"channel": "tickers", "instId": s}))
            .collect();
        Some(Message::Text(
            serde_json::json!({"op": "unsubscribe", "args": args}).to_string(),
        ))
    }

    fn build_ping_message(&self) -> Option<Message> {
        // OKX's keepalive is the bare literal "ping", not a JSON envelope.
        Some(Message::Text("ping".to_string()))
    }

    fn parse_frame(&self, text: &str) -> ParsedFrame {
        if text.trim() == "pong" {
            return ParsedFrame::Heartbeat;
        }
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return ParsedFrame::Ignore;
        };
        match value.get("event").and_then(Value::as_str) {
            Some("subscribe") => return ParsedFrame::SubscriptionAck,
            Some("error") => {
                let message = value
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return ParsedFrame::Error(message);
            }
            _ => {}
        }
        let is_tickers_channel = value
            .get("arg")
            .and_then(|a| a.get("channel"))
            .and_then(Value::as_str)
            == Some("tickers");
        if !is_tickers_channel {
            return ParsedFrame::Ignore;
        }
        match value.get("data").and_then(Value::as_array).and_then(|a| a.first()) {
            Some(item) => match parse_ticker_object(item) {
                Some(frame) => ParsedFrame::Ticker(frame),
                None => ParsedFrame::Ignore,
            },
            None => ParsedFrame::Ignore,
        }
    }

    fn classify_close_code(&self, code: u16) -> CloseClass {
        match code {
            1000 => CloseClass::Normal,
            1001 => CloseClass::PongTimeout,
            1006 => CloseClass::Abnormal,
            // Expected idle closure (spec §4.1): reconnect normally, logged at debug
            // severity by the caller rather than warn.
            4004 => CloseClass::VenueSpecific { extended_backoff: false },
            _ => CloseClass::VenueSpecific { extended_backoff: false },
        }
    }

    fn rest_ticker_url(&self, exchange_symbol: &str) -> String {
        rest_url("https://www.okx.com/api/v5/market/ticker", &[("instId", exchange_symbol)])
    }

    fn parse_rest_response(&self, body: &str, canonical_symbol: &str) -> Result<PriceObservation> {
        let value: Value = serde_json::from_str(body)?;
        let code = value.get("code").and_then(Value::as_str).unwrap_or("1");
        if code != "0" {
            let message = value.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
            return Err(OracleError::VenueError {
                adapter: "okx".to_string(),
                code: code.to_string(),
                message: message.to_string(),
            });
        }
        let item = value
            .get("data")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .ok_or_else(|| OracleError::ParseError {
                adapter: "okx".to_string(),
                message: "missing data payload".to_string(),
            })?;
        let mut frame = parse_ticker_object(item).ok_or_else(|| OracleError::ParseError {
            adapter: "okx".to_string(),
            message: "malformed ticker object".to_string(),
        })?;
        frame.symbol = canonical_symbol.to_string();
        normalize_price(&frame, "okx", now_ms()).ok_or_else(|| OracleError::ParseError {
            adapter: "okx".to_string(),
            message: "REST response missing a usable price".to_string(),
        })
    }
}

fn parse_ticker_object(item: &Value) -> Option<TickerFrame> {
    let symbol = item.get("instId")?.as_str()?.to_string();
    let last_price = item.get("last")?.as_str()?.to_string();
    Some(TickerFrame {
        symbol,
        last_price,
        bid: item.get("bidPx").and_then(Value::as_str).map(str::to_string),
        ask: item.get("askPx").and_then(Value::as_str).map(str::to_string),
        volume: item.get("vol24h").and_then(Value::as_str).map(str::to_string),
        timestamp: item
            .get("ts")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<f64>().ok())
            .map(RawTimestamp::Numeric),
    })
}

pub fn new_adapter(
    events: mpsc::Sender<AdapterEvent>,
    rate_limiter: Arc<RateLimiter>,
) -> VenueAdapter<OkxHooks> {
    let config = VenueConfig {
        name: "okx",
        category: Category::Crypto,
        ws_url: "wss://ws.okx.com:8443/ws/v5/public",
        rest_base_url: "https://www.okx.com",
        // Sent more frequently than OKX's own 30s idle timeout (spec §4.1).
        ping_interval: Duration::from_secs(20),
        pong_timeout: Duration::from_secs(40),
        supports_websocket: true,
        supports_volume: true,
    };
    VenueAdapter::new(config, OkxHooks, events, rate_limiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_mapping_round_trips() {
        let hooks = OkxHooks;
        let exchange = hooks.map_to_exchange("BTC/USDT");
        assert_eq!(exchange, "BTC-USDT");
        assert_eq!(hooks.map_from_exchange(&exchange), Some("BTC/USDT".to_string()));
    }

    #[test]
    fn bare_pong_is_heartbeat() {
        let hooks = OkxHooks;
        assert!(matches!(hooks.parse_frame("pong"), ParsedFrame::Heartbeat));
    }

    #[test]
    fn close_code_4004_is_not_treated_as_shutdown() {
        let hooks = OkxHooks;
        assert_ne!(hooks.classify_close_code(4004), CloseClass::Normal);
    }

    #[test]
    fn parses_tickers_channel_frame() {
        let hooks = OkxHooks;
        let text = r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","last":"50000","bidPx":"49999","askPx":"50001","vol24h":"1000","ts":"1700000000000"}]}"#;
        match hooks.parse_frame(text) {
            ParsedFrame::Ticker(frame) => assert_eq!(frame.last_price, "50000"),
            other => panic!("expected Ticker, got {other:?}"),
        }
    }
}
