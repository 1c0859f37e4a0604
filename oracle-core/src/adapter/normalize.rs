//! Frame parsing results and normalization math shared by every venue (spec §4.1
//! "Normalization", §8 "Boundary behavior"). Generalizes the teacher's hand-rolled
//! `validateResponse`/`normalizePrice` type guards into a closed sum type, per the
//! spec §9 "Dynamic typing of wire frames -> sum types" design note.

use tokio_tungstenite::tungstenite::Message;

use crate::types::PriceObservation;

/// Raw timestamp as it appeared on the wire, before normalization.
#[derive(Debug, Clone)]
pub enum RawTimestamp {
    /// Epoch value of unknown scale (spec §8: ">1e12 as ms, <=1e12 as s*1000").
    Numeric(f64),
    /// ISO-8601 string (Coinbase).
    Iso(String),
}

/// A venue's inbound ticker frame, after venue-specific parsing but before
/// normalization into a [`PriceObservation`].
#[derive(Debug, Clone)]
pub struct TickerFrame {
    pub symbol: String,
    pub last_price: String,
    pub bid: Option<String>,
    pub ask: Option<String>,
    pub volume: Option<String>,
    pub timestamp: Option<RawTimestamp>,
}

/// The closed set of inbound frame variants every venue parser produces (spec §9).
#[derive(Debug, Clone)]
pub enum ParsedFrame {
    Ticker(TickerFrame),
    /// A batch of tickers in one frame (Binance's `!ticker@arr` all-tickers stream).
    Tickers(Vec<TickerFrame>),
    SubscriptionAck,
    Heartbeat,
    Error(String),
    /// Frame recognized but not semantically interesting (e.g. a system status
    /// message); neither a dropped frame nor an error.
    Ignore,
    /// Frame demands an immediate reply on the same socket (Crypto.com's
    /// `public/heartbeat` echo, spec §4.2 "must reply to public/heartbeat").
    Respond(Message),
}

/// `validateResponse(raw)` from spec §4.1: non-empty symbol, numeric parsable
/// price, plausible (non-negative, non-absurd) timestamp.
pub fn validate_frame(frame: &TickerFrame) -> bool {
    if frame.symbol.trim().is_empty() {
        return false;
    }
    let price: Result<f64, _> = frame.last_price.parse();
    match price {
        Ok(p) if p.is_finite() && p > 0.0 => {}
        _ => return false,
    }
    true
}

/// Timestamp normalization (spec §4.1, §8): numeric scale detection, clock-skew
/// substitution beyond 10 minutes, and a safe fallback to `now` for anything
/// unparsable.
pub fn normalize_timestamp(raw: Option<&RawTimestamp>, now_ms: i64) -> i64 {
    const SKEW_TOLERANCE_MS: i64 = 10 * 60 * 1000;
    let candidate = match raw {
        Some(RawTimestamp::Numeric(n)) => {
            if *n > 1e12 {
                Some(*n as i64)
            } else if *n > 0.0 {
                Some((*n * 1000.0) as i64)
            } else {
                None
            }
        }
        Some(RawTimestamp::Iso(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        None => None,
    };
    match candidate {
        Some(ms) if (now_ms - ms).abs() <= SKEW_TOLERANCE_MS => ms,
        _ => now_ms,
    }
}

/// `calculateSpreadPercent` from spec §8: `(ask - bid) / price * 100`, 0 when
/// `bid == ask`, never negative.
pub fn calculate_spread_percent(bid: f64, ask: f64, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    ((ask - bid) / price * 100.0).max(0.0)
}

/// Confidence seeding and adjustment from spec §4.1: seeded at 1.0, latency
/// penalty, volume bonus, spread penalty, clamped to [0,1].
pub fn compute_confidence(latency_ms: f64, volume: Option<f64>, spread_pct: f64) -> f64 {
    let latency_penalty = (latency_ms / 1000.0).min(0.5).max(0.0);
    let volume_bonus = volume
        .filter(|v| *v > 0.0)
        .map(|v| (v.log10() / 10.0).min(0.2).max(0.0))
        .unwrap_or(0.0);
    let spread_penalty = (spread_pct / 10.0).min(0.5).max(0.0);
    (1.0 - latency_penalty + volume_bonus - spread_penalty).clamp(0.0, 1.0)
}

/// `normalizePrice(raw) -> PriceObservation` (spec §4.1). Returns `None` if the
/// frame must be dropped (price not finite and positive).
pub fn normalize_price(frame: &TickerFrame, source: &str, now_ms: i64) -> Option<PriceObservation> {
    if !validate_frame(frame) {
        return None;
    }
    let price: f64 = frame.last_price.parse().ok()?;
    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    let timestamp = normalize_timestamp(frame.timestamp.as_ref(), now_ms);
    let latency_ms = (now_ms - timestamp).max(0) as f64;
    let volume: Option<f64> = frame.volume.as_deref().and_then(|v| v.parse().ok());
    let spread_pct = match (
        frame.bid.as_deref().and_then(|b| b.parse::<f64>().ok()),
        frame.ask.as_deref().and_then(|a| a.parse::<f64>().ok()),
    ) {
        (Some(bid), Some(ask)) => calculate_spread_percent(bid, ask, price),
        _ => 0.0,
    };
    let confidence = compute_confidence(latency_ms, volume, spread_pct);
    Some(PriceObservation {
        symbol: frame.symbol.clone(),
        price,
        timestamp,
        source: source.to_string(),
        volume,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_zero_when_bid_equals_ask() {
        assert_eq!(calculate_spread_percent(100.0, 100.0, 100.0), 0.0);
    }

    #[test]
    fn spread_extreme_case_matches_spec_example() {
        assert!((calculate_spread_percent(50.0, 150.0, 100.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn spread_never_negative() {
        assert_eq!(calculate_spread_percent(150.0, 50.0, 100.0), 0.0);
    }

    #[test]
    fn numeric_timestamp_over_1e12_treated_as_millis() {
        let now = 1_700_000_000_000;
        let ts = normalize_timestamp(Some(&RawTimestamp::Numeric(1_699_999_999_000.0)), now);
        assert_eq!(ts, 1_699_999_999_000);
    }

    #[test]
    fn numeric_timestamp_at_or_below_1e12_treated_as_seconds() {
        let now = 1_700_000_000_000;
        let ts = normalize_timestamp(Some(&RawTimestamp::Numeric(1_699_999_999.0)), now);
        assert_eq!(ts, 1_699_999_999_000);
    }

    #[test]
    fn missing_timestamp_falls_back_to_now() {
        let now = 1_700_000_000_000;
        assert_eq!(normalize_timestamp(None, now), now);
    }

    #[test]
    fn clock_skew_beyond_tolerance_substitutes_now() {
        let now = 1_700_000_000_000;
        let far_future = now + 20 * 60 * 1000;
        let ts = normalize_timestamp(Some(&RawTimestamp::Numeric(far_future as f64)), now);
        assert_eq!(ts, now);
    }

    #[test]
    fn iso_timestamp_parses() {
        let now = chrono::Utc::now().timestamp_millis();
        let iso = chrono::Utc::now().to_rfc3339();
        let ts = normalize_timestamp(Some(&RawTimestamp::Iso(iso)), now);
        assert!((now - ts).abs() < 5000);
    }

    #[test]
    fn validate_rejects_empty_symbol() {
        let f = TickerFrame {
            symbol: "".into(),
            last_price: "100".into(),
            bid: None,
            ask: None,
            volume: None,
            timestamp: None,
        };
        assert!(!validate_frame(&f));
    }

    #[test]
    fn validate_rejects_non_numeric_price() {
        let f = TickerFrame {
            symbol: "BTC/USDT".into(),
            last_price: "not-a-number".into(),
            bid: None,
            ask: None,
            volume: None,
            timestamp: None,
        };
        assert!(!validate_frame(&f));
    }

    #[test]
    fn normalize_price_drops_non_positive() {
        let f = TickerFrame {
            symbol: "BTC/USDT".into(),
            last_price: "-5".into(),
            bid: None,
            ask: None,
            volume: None,
            timestamp: None,
        };
        assert!(normalize_price(&f, "binance", 0).is_none());
    }

    #[test]
    fn normalize_price_happy_path_matches_s1_scenario() {
        let now = 1_700_000_000_000;
        let f = TickerFrame {
            symbol: "BTC/USDT".into(),
            last_price: "50000.00".into(),
            bid: Some("49999.00".into()),
            ask: Some("50001.00".into()),
            volume: Some("1000.0".into()),
            timestamp: Some(RawTimestamp::Numeric(now as f64)),
        };
        let obs = normalize_price(&f, "binance", now).unwrap();
        assert_eq!(obs.price, 50000.0);
        assert_eq!(obs.source, "binance");
        assert!(obs.confidence > 0.9);
    }
}
