//! Per-venue hook implementations (spec §4.2). Each module supplies a `VenueHooks`
//! impl plus a constructor function; the shared driving logic lives in
//! `adapter::driver::VenueAdapter`.

pub mod binance;
pub mod coinbase;
pub mod cryptocom;
pub mod kraken;
pub mod okx;
pub mod tier2;

/// Known quote tokens used to reconstruct `BASE/QUOTE` from an unseparated
/// exchange symbol (spec §4.1: "Reverse mapping reconstructs `/` by recognizing
/// known quote tokens... when no separator is present").
const KNOWN_QUOTE_TOKENS: &[&str] = &["USDT", "USDC", "USD", "EUR", "BTC", "ETH"];

/// Builds a REST ticker URL by appending query parameters through `url::Url`
/// rather than hand-formatting a query string, so a symbol containing characters
/// that need percent-encoding (none of the venues' own symbols do today, but a
/// tier-2 REST basket entry might) is still a well-formed URL.
pub fn rest_url(base: &str, params: &[(&str, &str)]) -> String {
    let mut url = url::Url::parse(base).expect("venue REST base URLs are fixed, valid constants");
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    url.to_string()
}

/// Splits an unseparated symbol like `BTCUSDT` into `("BTC", "USDT")` by matching
/// the longest known quote token suffix.
pub fn split_known_quote(symbol: &str) -> Option<(String, String)> {
    let upper = symbol.to_uppercase();
    let mut matches: Vec<&&str> = KNOWN_QUOTE_TOKENS
        .iter()
        .filter(|q| upper.len() > q.len() && upper.ends_with(**q))
        .collect();
    matches.sort_by_key(|q| std::cmp::Reverse(q.len()));
    let quote = matches.first()?;
    let base = &upper[..upper.len() - quote.len()];
    if base.is_empty() {
        return None;
    }
    Some((base.to_string(), quote.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn splits_usdt_quote() {
        assert_eq!(
            split_known_quote("BTCUSDT"),
            Some(("BTC".to_string(), "USDT".to_string()))
        );
    }

    #[test]
    fn prefers_longest_matching_quote() {
        // "ETHBTC" could match quote=BTC (base=ETH); there is no overlap with USDT/ETH here.
        assert_eq!(
            split_known_quote("ETHBTC"),
            Some(("ETH".to_string(), "BTC".to_string()))
        );
    }

    #[test]
    fn returns_none_for_unknown_quote() {
        assert_eq!(split_known_quote("XYZZY"), None);
    }

    #[test]
    fn rest_url_appends_query_params() {
        let url = rest_url("https://api.example.com/ticker", &[("symbol", "BTCUSDT")]);
        assert_eq!(url, "https://api.example.com/ticker?symbol=BTCUSDT");
    }

    #[test]
    fn rest_url_percent_encodes_special_characters() {
        let url = rest_url("https://api.example.com/ticker", &[("pair", "BTC/USD")]);
        assert_eq!(url, "https://api.example.com/ticker?pair=BTC%2FUSD");
    }

    proptest::proptest! {
        /// `mapFromExchange(mapToExchange(x)) == x` for every venue's canonical
        /// symbol space (spec §8 "Round-trips"), across a random base/quote pair.
        #[test]
        fn symbol_round_trips_for_every_venue(
            base in "[A-Z]{3,5}",
            quote_idx in 0usize..KNOWN_QUOTE_TOKENS.len(),
        ) {
            let quote = KNOWN_QUOTE_TOKENS[quote_idx];
            if base == quote {
                return Ok(());
            }
            let canonical = format!("{base}/{quote}");

            use crate::adapter::driver::VenueHooks;
            let hooks: Vec<Box<dyn VenueHooks>> = vec![
                Box::new(super::binance::BinanceHooks),
                Box::new(super::coinbase::CoinbaseHooks),
                Box::new(super::kraken::KrakenHooks),
                Box::new(super::okx::OkxHooks),
                Box::new(super::cryptocom::CryptocomHooks),
            ];
            for hook in hooks {
                let exchange_symbol = hook.map_to_exchange(&canonical);
                let back = hook.map_from_exchange(&exchange_symbol);
                prop_assert_eq!(back, Some(canonical.clone()));
            }
        }
    }
}
