//! Crypto.com adapter hooks (spec §4.2 table row 5). The one venue in the set that
//! requires an application-level reply rather than a plain pong: `public/heartbeat`
//! frames must be echoed back with the same `id` or the venue drops the socket.

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

pub struct CryptocomHooks;

impl VenueHooks for CryptocomHooks {
    fn map_to_exchange(&self, feed_symbol: &str) -> String {
        feed_symbol.replace('/', "_").to_uppercase()
    }

    fn map_from_exchange(&self, exchange_symbol: &str) -> Option<String> {
        let mut parts = exchange_symbol.split('_');
        let base = parts.next()?;
        let quote = parts.next()?;
        if parts.next().is_some() || base.is_empty() || quote.is_empty() {
            return None;
        }
        Some(format!("{}/{}", base.to_uppercase(), quote.to_uppercase()))
    }

    fn build_subscribe_message(&self, exchange_symbols: &[String]) -> Message {
        let channels: Vec<String> = exchange_symbols.iter().map(|s| format!("ticker.{s}")).collect();
        let body = serde_json::json!({
            "id": 1,
            "method": "subscribe",
            "params": {"channels": channels},
        });
        Message::Text(body.to_string())
    }

    fn build_unsubscribe_message(&self, exchange_symbols: &[String]) -> Option<Message> {
        let channels: Vec<String> = exchange_symbols.iter().map(|s| format!("ticker.{s}")).collect();
        Some(Message::Text(
            serde_json::json!({"id": 1, "method": "unsubscribe", "params": {"channels": channels}})
                .to_string(),
        ))
    }

    fn build_ping_message(&self) -> Option<Message> {
        // Crypto.com expects the client to originate heartbeats too, every ~30s
        // (spec §4.2); replies to the venue's own heartbeat are handled in
        // `parse_frame` via `ParsedFrame::Respond`.
        Some(Message::Text(
            serde_json::json!({"id": 1, "method": "public/heartbeat"}).to_string(),
        ))
    }

    fn parse_frame(&self, text: &str) -> ParsedFrame {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return ParsedFrame::Ignore;
        };
        let method = value.get("method").and_then(Value::as_str);
        if method == Some("public/heartbeat") {
            let id = value.get("id").cloned().unwrap_or(Value::Null);
            let reply = serde_json::json!({"id": id, "method": "public/respond-heartbeat"});
            return ParsedFrame::Respond(Message::Text(reply.to_string()));
        }
        if method == Some("subscribe") {
            let result = match value.get("result") {
                Some(result) => result,
                None => return ParsedFrame::SubscriptionAck,
            };
            let channel = result.get("channel").and_then(Value::as_str).unwrap_or("");
            if !channel.starts_with("ticker") {
                return ParsedFrame::SubscriptionAck;
            }
            match result.get("data").and_then(Value::as_array).and_then(|a| a.first()) {
                Some(item) => match parse_ticker_object(item, result) {
                    Some(frame) => ParsedFrame::Ticker(frame),
                    None => ParsedFrame::Ignore,
                },
                None => ParsedFrame::SubscriptionAck,
            }
        } else if let Some(code) = value.get("code").and_then(Value::as_i64) {
            if code != 0 {
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                ParsedFrame::Error(message)
            } else {
                ParsedFrame::Ignore
            }
        } else {
            ParsedFrame::Ignore
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
        rest_url("https://api.crypto.com/v2/public/get-ticker", &[("instrument_name", exchange_symbol)])
    }

    fn parse_rest_response(&self, body: &str, canonical_symbol: &str) -> Result<PriceObservation> {
        let value: Value = serde_json::from_str(body)?;
        let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(OracleError::VenueError {
                adapter: "cryptocom".to_string(),
                code: code.to_string(),
                message: message.to_string(),
            });
        }
        let item = value
            .get("result")
            .and_then(|r| r.get("data"))
            .ok_or_else(|| OracleError::ParseError {
                adapter: "cryptocom".to_string(),
                message: "missing result.data payload".to_string(),
            })?;
        let frame = TickerFrame {
            symbol: canonical_symbol.to_string(),
            last_price: value_string(item, "a"),
            bid: item.get("b").and_then(Value::as_f64).map(|v| v.to_string()),
            ask: item.get("k").and_then(Value::as_f64).map(|v| v.to_string()),
            volume: item.get("v").and_then(Value::as_f64).map(|v| v.to_string()),
            timestamp: item.get("t").and_then(Value::as_f64).map(RawTimestamp::Numeric),
        };
        normalize_price(&frame, "cryptocom", now_ms()).ok_or_else(|| OracleError::ParseError {
            adapter: "cryptocom".to_string(),
            message: "REST response missing a usable price".to_string(),
        })
    }
}

fn parse_ticker_object(item: &Value, result: &Value) -> Option<TickerFrame> {
    let instrument = result
        .get("instrument_name")
        .and_then(Value::as_str)
        .or_else(|| item.get("i").and_then(Value::as_str))?
        .to_string();
    let last_price = item.get("a").and_then(Value::as_f64)?.to_string();
    Some(TickerFrame {
        symbol: instrument,
        last_price,
        bid: item.get("b").and_then(Value::as_f64).map(|v| v.to_string()),
        ask: item.get("k").and_then(Value::as_f64).map(|v| v.to_string()),
        volume: item.get("v").and_then(Value::as_f64).map(|v| v.to_string()),
        timestamp: item.get("t").and_then(Value::as_f64).map(RawTimestamp::Numeric),
    })
}

fn value_string(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_f64).map(|v| v.to_string()).unwrap_or_default()
}

pub fn new_adapter(
    events: mpsc::Sender<AdapterEvent>,
    rate_limiter: Arc<RateLimiter>,
) -> VenueAdapter<CryptocomHooks> {
    let config = VenueConfig {
        name: "cryptocom",
        category: Category::Crypto,
        ws_url: "wss://stream.crypto.com/v2/market",
        rest_base_url: "https://api.crypto.com",
        ping_interval: Duration::from_secs(30),
        pong_timeout: Duration::from_secs(45),
        supports_websocket: true,
        supports_volume: true,
    };
    VenueAdapter::new(config, CryptocomHooks, events, rate_limiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_mapping_round_trips() {
        let hooks = CryptocomHooks;
        let exchange = hooks.map_to_exchange("BTC/USDT");
        assert_eq!(exchange, "BTC_USDT");
        assert_eq!(hooks.map_from_exchange(&exchange), Some("BTC/USDT".to_string()));
    }

    #[test]
    fn heartbeat_gets_an_echoed_response() {
        let hooks = CryptocomHooks;
        let text = r#"{"id":42,"method":"public/heartbeat","code":0}"#;
        match hooks.parse_frame(text) {
            ParsedFrame::Respond(Message::Text(body)) => {
                assert!(body.contains("public/respond-heartbeat"));
                assert!(body.contains("42"));
            }
            other => panic!("expected Respond, got {other:?}"),
        }
    }

    #[test]
    fn parses_ticker_push_frame() {
        let hooks = CryptocomHooks;
        let text = r#"{"id":-1,"method":"subscribe","result":{"instrument_name":"BTC_USDT","channel":"ticker.BTC_USDT","data":[{"i":"BTC_USDT","a":50000.0,"b":49999.0,"k":50001.0,"v":1000.0,"t":1700000000000}]}}"#;
        match hooks.parse_frame(text) {
            ParsedFrame::Ticker(frame) => {
                assert_eq!(frame.symbol, "BTC_USDT");
                assert_eq!(frame.last_price, "50000");
            }
            other => panic!("expected Ticker, got {other:?}"),
        }
    }

    #[test]
    fn error_code_surfaces_as_error_frame() {
        let hooks = CryptocomHooks;
        let text = r#"{"id":1,"code":10003,"message":"invalid channel"}"#;
        assert!(matches!(hooks.parse_frame(text), ParsedFrame::Error(_)));
    }
}
