//! Core data model: feeds, observations, and aggregated prices.
//!
//! Mirrors the value-type conventions of the teacher's protocol layer (small, Copy-ish,
//! crossing task boundaries by value) without any of the binary TLV framing — every
//! consumer downstream of the adapters speaks plain Rust structs.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Feed category, mirrors the four asset classes the oracle tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Crypto,
    Forex,
    Commodity,
    Stock,
}

impl Category {
    /// Decode the wire-level numeric category used by the HTTP API (spec §6).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Category::Crypto),
            2 => Some(Category::Forex),
            3 => Some(Category::Commodity),
            4 => Some(Category::Stock),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Category::Crypto => 1,
            Category::Forex => 2,
            Category::Commodity => 3,
            Category::Stock => 4,
        }
    }
}

/// Canonical trading pair identifier. `name` is always `BASE/QUOTE`, both tokens
/// 2-8 uppercase characters, normalized on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedId {
    pub category: Category,
    pub name: String,
}

/// Errors from [`FeedId::new`] — the feed-name boundary checks from spec §8.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FeedIdError {
    #[error("feed name must contain exactly one '/'")]
    MissingOrExtraSeparator,
    #[error("feed name tokens must be 2-8 alphabetic characters")]
    InvalidToken,
}

impl FeedId {
    /// Normalize and validate a `BASE/QUOTE` name against `^[A-Z]{2,8}/[A-Z]{2,8}$`
    /// after uppercasing (spec §6 "Feed name validation").
    pub fn new(category: Category, name: &str) -> Result<Self, FeedIdError> {
        let upper = name.to_uppercase();
        let mut parts = upper.split('/');
        let (base, quote, rest) = (parts.next(), parts.next(), parts.next());
        if rest.is_some() {
            return Err(FeedIdError::MissingOrExtraSeparator);
        }
        let (base, quote) = match (base, quote) {
            (Some(b), Some(q)) if !b.is_empty() && !q.is_empty() => (b, q),
            _ => return Err(FeedIdError::MissingOrExtraSeparator),
        };
        let valid_token = |t: &str| {
            (2..=8).contains(&t.len()) && t.chars().all(|c| c.is_ascii_alphabetic())
        };
        if !valid_token(base) || !valid_token(quote) {
            return Err(FeedIdError::InvalidToken);
        }
        Ok(Self {
            category,
            name: format!("{base}/{quote}"),
        })
    }
}

impl std::fmt::Display for FeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.category.code(), self.name)
    }
}

/// Current time in epoch milliseconds, UTC.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One raw datum from one source, post-normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub symbol: String,
    pub price: f64,
    /// Epoch ms, UTC.
    pub timestamp: i64,
    pub source: String,
    pub volume: Option<f64>,
    /// Seeded and adjusted per spec §4.1 / §4.5, always clamped to [0, 1].
    pub confidence: f64,
}

impl PriceObservation {
    /// `now - timestamp`, in milliseconds. Never negative thanks to the clock-skew
    /// substitution performed during normalization.
    pub fn age_ms(&self, now: i64) -> i64 {
        (now - self.timestamp).max(0)
    }
}

/// A volume datum from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeObservation {
    pub symbol: String,
    pub volume: f64,
    pub timestamp: i64,
    pub source: String,
}

/// Consensus result for one feed, produced by the aggregation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub symbol: String,
    pub price: f64,
    pub timestamp: i64,
    pub sources: Vec<String>,
    pub confidence: f64,
    pub consensus_score: f64,
    /// Set when the caller's freshness window has been exceeded but a stale value is
    /// still being returned (spec §9 Open Question: stale flag instead of 404).
    #[serde(default)]
    pub stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_valid_feed_names() {
        assert!(FeedId::new(Category::Crypto, "btc/usdt").is_ok());
        let f = FeedId::new(Category::Crypto, "btc/usdt").unwrap();
        assert_eq!(f.name, "BTC/USDT");
    }

    #[test]
    fn rejects_missing_slash() {
        assert_eq!(
            FeedId::new(Category::Crypto, "BTCUSDT").unwrap_err(),
            FeedIdError::MissingOrExtraSeparator
        );
    }

    #[test]
    fn rejects_multiple_slashes() {
        assert_eq!(
            FeedId::new(Category::Crypto, "BTC/USD/T").unwrap_err(),
            FeedIdError::MissingOrExtraSeparator
        );
    }

    #[test]
    fn rejects_empty() {
        assert!(FeedId::new(Category::Crypto, "").is_err());
    }

    #[test]
    fn rejects_overlength_token() {
        assert_eq!(
            FeedId::new(Category::Crypto, "ABCDEFGHI/USD").unwrap_err(),
            FeedIdError::InvalidToken
        );
    }

    #[test]
    fn category_round_trips_through_code() {
        for c in [Category::Crypto, Category::Forex, Category::Commodity, Category::Stock] {
            assert_eq!(Category::from_code(c.code()), Some(c));
        }
        assert_eq!(Category::from_code(0), None);
        assert_eq!(Category::from_code(5), None);
    }

    proptest::proptest! {
        /// Any pair of 2-8 character uppercase-alphabetic tokens forms a feed name
        /// that normalizes losslessly (spec §8 "Feed-name regex rejects ...
        /// over-length inputs" -- the converse: in-range inputs always round-trip).
        #[test]
        fn any_valid_token_pair_round_trips(
            base in "[A-Za-z]{2,8}",
            quote in "[A-Za-z]{2,8}",
        ) {
            let name = format!("{base}/{quote}");
            let feed = FeedId::new(Category::Crypto, &name).unwrap();
            prop_assert_eq!(feed.name, format!("{}/{}", base.to_uppercase(), quote.to_uppercase()));
        }

        /// Tokens outside the 2-8 length bound are always rejected, regardless of
        /// how the in-bound side looks.
        #[test]
        fn overlength_token_always_rejected(
            base in "[A-Za-z]{9,20}",
            quote in "[A-Za-z]{2,8}",
        ) {
            let name = format!("{base}/{quote}");
            prop_assert!(FeedId::new(Category::Crypto, &name).is_err());
        }
    }
}
