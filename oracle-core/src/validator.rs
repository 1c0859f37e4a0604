//! Stateless per-observation validation (spec §4.5): six tiers of checks, each
//! appending errors at one of four severities, folding into an adjusted confidence
//! and a pass/fail validity verdict.

use serde::{Deserialize, Serialize};

use crate::config::OracleConfig;
use crate::types::PriceObservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Confidence multiplier applied per error of this severity (spec §4.5).
    fn multiplier(self) -> f64 {
        match self {
            Severity::Critical => 0.1,
            Severity::High => 0.5,
            Severity::Medium => 0.8,
            Severity::Low => 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub tier: &'static str,
    pub severity: Severity,
    pub message: String,
}

/// Additional context the outlier/cross-source/consensus tiers need, gathered by
/// the caller (aggregation engine) before invoking [`validate`].
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// Recent observations for this symbol from the same source, most recent last.
    pub window: Vec<PriceObservation>,
    /// Latest observed price per other contributing source.
    pub other_source_prices: Vec<f64>,
    /// The aggregator's current consensus median for this symbol, if any.
    pub consensus_median: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub adjusted_confidence: f64,
    pub adjusted_observation: PriceObservation,
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Runs all six tiers in order against `observation`, returning the adjusted
/// confidence and validity verdict (spec §4.5).
pub fn validate(
    observation: &PriceObservation,
    now_ms: i64,
    config: &OracleConfig,
    context: &ValidationContext,
) -> ValidationResult {
    let mut errors = Vec::new();

    // Tier 1: format.
    if observation.symbol.trim().is_empty() {
        errors.push(err("format", Severity::Critical, "empty symbol"));
    }
    if !observation.price.is_finite() || observation.price <= 0.0 {
        errors.push(err("format", Severity::Critical, "price not finite and positive"));
    }
    if observation.timestamp <= 0 {
        errors.push(err("format", Severity::Critical, "non-positive timestamp"));
    }
    if let Some(latest) = context.window.iter().map(|o| o.timestamp).max() {
        if observation.timestamp < latest {
            errors.push(err("format", Severity::Critical, "timestamp is not monotonic for this source"));
        }
    }
    if observation.source.trim().is_empty() {
        errors.push(err("format", Severity::Critical, "empty source"));
    }
    if !(0.0..=1.0).contains(&observation.confidence) {
        errors.push(err("format", Severity::Critical, "confidence out of [0,1]"));
    }

    // Tier 2: range.
    if observation.price <= 0.0 {
        errors.push(err("range", Severity::Critical, "price <= 0"));
    } else if observation.price < config.price_range_min || observation.price > config.price_range_max {
        errors.push(err("range", Severity::High, "price outside configured range"));
    }

    // Tier 3: staleness.
    let age = observation.age_ms(now_ms);
    if age > config.max_data_age_ms {
        errors.push(err("staleness", Severity::Critical, "observation exceeds max data age"));
    } else if age as f64 > 0.8 * config.max_data_age_ms as f64 {
        errors.push(err("staleness", Severity::Low, "observation nearing max data age"));
    }

    // Tier 4: outlier, vs. this source's own recent window.
    if context.window.len() >= 3 {
        let prices: Vec<f64> = context.window.iter().map(|o| o.price).collect();
        let (mean, std) = mean_std(&prices);
        if std > 0.0 && ((observation.price - mean) / std).abs() > 2.5 {
            errors.push(err("outlier", Severity::Medium, "price beyond 2.5 std devs of recent window"));
        }
        let recent: Vec<f64> = prices.iter().rev().take(5).copied().collect();
        let recent_mean = recent.iter().sum::<f64>() / recent.len() as f64;
        if recent_mean > 0.0 {
            let deviation = (observation.price - recent_mean).abs() / recent_mean;
            if deviation > 2.0 * config.outlier_threshold {
                errors.push(err("outlier", Severity::High, "price far from recent mean"));
            } else if deviation > config.outlier_threshold {
                errors.push(err("outlier", Severity::Medium, "price deviates from recent mean"));
            }
        }
    }

    // Tier 5: cross-source.
    if context.other_source_prices.len() >= 2 {
        if let Some(other_median) = median(context.other_source_prices.clone()) {
            if other_median > 0.0 {
                let deviation = (observation.price - other_median).abs() / other_median;
                if deviation > 0.04 {
                    errors.push(err("cross_source", Severity::High, "price far from other sources' median"));
                } else if deviation > 0.02 {
                    errors.push(err("cross_source", Severity::Medium, "price deviates from other sources' median"));
                }
            }
        }
    }

    // Tier 6: consensus.
    if let Some(consensus) = context.consensus_median {
        if consensus > 0.0 {
            let deviation = (observation.price - consensus).abs() / consensus;
            if deviation > 0.01 {
                errors.push(err("consensus", Severity::High, "price far from consensus"));
            } else if deviation > 0.005 {
                errors.push(err("consensus", Severity::Medium, "price deviates from consensus"));
            }
        }
    }

    let critical_count = errors.iter().filter(|e| e.severity == Severity::Critical).count();
    let high_count = errors.iter().filter(|e| e.severity == Severity::High).count();
    let is_valid = critical_count == 0 && high_count <= 1;

    let mut adjusted_confidence = observation.confidence;
    for e in &errors {
        adjusted_confidence *= e.severity.multiplier();
    }
    adjusted_confidence = adjusted_confidence.clamp(0.0, 1.0);

    let mut adjusted_observation = observation.clone();
    adjusted_observation.confidence = adjusted_confidence;

    ValidationResult {
        is_valid,
        errors,
        adjusted_confidence,
        adjusted_observation,
    }
}

fn err(tier: &'static str, severity: Severity, message: &str) -> ValidationError {
    ValidationError {
        tier,
        severity,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(price: f64, timestamp: i64) -> PriceObservation {
        PriceObservation {
            symbol: "BTC/USDT".to_string(),
            price,
            timestamp,
            source: "binance".to_string(),
            volume: None,
            confidence: 1.0,
        }
    }

    #[test]
    fn happy_path_is_valid_with_near_full_confidence() {
        let config = OracleConfig::default();
        let result = validate(&obs(50000.0, 1_700_000_000_000), 1_700_000_000_050, &config, &Default::default());
        assert!(result.is_valid);
        assert!(result.adjusted_confidence > 0.9);
    }

    #[test]
    fn non_positive_price_is_critical_and_invalid() {
        let config = OracleConfig::default();
        let result = validate(&obs(-5.0, 1_700_000_000_000), 1_700_000_000_050, &config, &Default::default());
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.severity == Severity::Critical));
    }

    #[test]
    fn stale_observation_beyond_max_age_is_critical() {
        let config = OracleConfig::default();
        let now = 1_700_000_010_000;
        let result = validate(&obs(50000.0, 1_700_000_000_000), now, &config, &Default::default());
        assert!(!result.is_valid);
    }

    #[test]
    fn out_of_order_timestamp_is_critical_and_invalid() {
        let config = OracleConfig::default();
        let context = ValidationContext {
            window: vec![obs(50000.0, 1_700_000_000_500)],
            ..Default::default()
        };
        let result = validate(&obs(50010.0, 1_700_000_000_100), 1_700_000_000_600, &config, &context);
        assert!(!result.is_valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.tier == "format" && e.severity == Severity::Critical));
    }

    #[test]
    fn equal_timestamp_to_latest_is_not_treated_as_out_of_order() {
        let config = OracleConfig::default();
        let context = ValidationContext {
            window: vec![obs(50000.0, 1_700_000_000_500)],
            ..Default::default()
        };
        let result = validate(&obs(50010.0, 1_700_000_000_500), 1_700_000_000_600, &config, &context);
        assert!(!result
            .errors
            .iter()
            .any(|e| e.message.contains("monotonic")));
    }

    #[test]
    fn outlier_against_window_gets_flagged_and_confidence_drops() {
        let config = OracleConfig::default();
        let window: Vec<PriceObservation> = (0..10).map(|_| obs(50000.0, 1_700_000_000_000)).collect();
        let context = ValidationContext {
            window,
            ..Default::default()
        };
        let result = validate(&obs(75000.0, 1_700_000_000_000), 1_700_000_000_010, &config, &context);
        assert!(result.adjusted_confidence < 0.5);
    }

    #[test]
    fn cross_source_deviation_flags_high_severity() {
        let config = OracleConfig::default();
        let context = ValidationContext {
            other_source_prices: vec![50000.0, 50010.0],
            ..Default::default()
        };
        let result = validate(&obs(53000.0, 1_700_000_000_000), 1_700_000_000_010, &config, &context);
        assert!(result.errors.iter().any(|e| e.tier == "cross_source" && e.severity == Severity::High));
    }

    #[test]
    fn consensus_deviation_flags_medium_severity() {
        let config = OracleConfig::default();
        let context = ValidationContext {
            consensus_median: Some(50000.0),
            ..Default::default()
        };
        let result = validate(&obs(50400.0, 1_700_000_000_000), 1_700_000_000_010, &config, &context);
        assert!(result.errors.iter().any(|e| e.tier == "consensus"));
    }

    #[test]
    fn at_most_one_high_error_still_valid() {
        let config = OracleConfig::default();
        let context = ValidationContext {
            other_source_prices: vec![50000.0, 50010.0],
            ..Default::default()
        };
        // price deviates from cross-source median (1 high) but nothing else -- still valid.
        let result = validate(&obs(53000.0, 1_700_000_000_000), 1_700_000_000_010, &config, &context);
        assert!(result.is_valid);
    }
}
