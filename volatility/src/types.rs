use std::fmt;

use serde::{Deserialize, Serialize};

/// A validated price observation.
///
/// Only the normalizer builds these, so every `Tick` has a non-empty pair, a
/// positive finite price, and a timestamp strictly after the previous
/// accepted tick of the same pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Tick {
    pub pair: String,
    pub ts_ms: u64,
    pub price: f64,
}

/// Recursive variance state of one pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VarianceState {
    /// Variance expected for the next return (σ²_{t+1|t}).
    pub conditional_variance: f64,
    /// Most recent log-return absorbed by the filter.
    pub last_return: f64,
    /// Returns absorbed since the state was seeded or restored.
    pub tick_count: u64,
}

impl VarianceState {
    pub fn seeded(variance: f64) -> Self {
        Self {
            conditional_variance: variance,
            last_return: 0.0,
            tick_count: 0,
        }
    }
}

/// One persisted volatility snapshot.
///
/// Serialized field-for-field as one JSON line in the append log, so field
/// names are part of the on-disk format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolatilityRecord {
    pub pair: String,
    /// Tick timestamp, milliseconds.
    pub timestamp: u64,
    pub price: f64,
    /// Annualized realized volatility over the return window.
    pub realized_vol: f64,
    /// Conditional variance in force for this tick's return (σ²_t).
    pub garch_variance: f64,
    /// One-step-ahead volatility forecast, sqrt(σ²_{t+1|t}).
    pub garch_forecast: f64,
    pub implied_vol: f64,
    pub spread: f64,
}

impl VolatilityRecord {
    pub fn regime(&self) -> VolRegime {
        VolRegime::classify(self.realized_vol)
    }
}

/// Coarse bucket of annualized realized volatility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolRegime {
    Low,
    Normal,
    Elevated,
    High,
}

impl VolRegime {
    pub const LOW_BELOW: f64 = 0.20;
    pub const NORMAL_BELOW: f64 = 0.50;
    pub const ELEVATED_BELOW: f64 = 0.80;

    pub fn classify(annualized_vol: f64) -> Self {
        if annualized_vol < Self::LOW_BELOW {
            VolRegime::Low
        } else if annualized_vol < Self::NORMAL_BELOW {
            VolRegime::Normal
        } else if annualized_vol < Self::ELEVATED_BELOW {
            VolRegime::Elevated
        } else {
            VolRegime::High
        }
    }
}

impl fmt::Display for VolRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolRegime::Low => "low",
            VolRegime::Normal => "normal",
            VolRegime::Elevated => "elevated",
            VolRegime::High => "high",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regime_thresholds() {
        assert_eq!(VolRegime::classify(0.0), VolRegime::Low);
        assert_eq!(VolRegime::classify(0.19), VolRegime::Low);
        assert_eq!(VolRegime::classify(0.20), VolRegime::Normal);
        assert_eq!(VolRegime::classify(0.55), VolRegime::Elevated);
        assert_eq!(VolRegime::classify(0.80), VolRegime::High);
        assert_eq!(VolRegime::classify(3.0), VolRegime::High);
    }

    #[test]
    fn record_serializes_with_flat_field_names() {
        let rec = VolatilityRecord {
            pair: "NEO/USDT".into(),
            timestamp: 3,
            price: 14.9,
            realized_vol: 0.5,
            garch_variance: 0.0002,
            garch_forecast: 0.0141,
            implied_vol: 0.55,
            spread: 0.05,
        };

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["pair"], "NEO/USDT");
        assert_eq!(json["timestamp"], 3);
        assert!(json.get("garch_forecast").is_some());
        assert_eq!(rec.regime(), VolRegime::Elevated);
    }
}
