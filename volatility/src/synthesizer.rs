//! Signal Synthesizer
//!
//! Turns the estimator's realized volatility and the forecaster's one-step
//! variance into the values that get published:
//!
//! ```text
//! garch_forecast = sqrt(σ²_{t+1|t})
//! implied_vol    = realized_vol · implied_vol_skew
//! spread         = realized_vol · spread_fraction
//! ```
//!
//! "Implied" volatility here is a synthetic risk-premium transform of
//! realized volatility. It is not backed out of option prices.
//!
//! ## Sanitization
//! Every output passes through [`SignalConfig::sanitize`]: NaN and values
//! below the floor become the floor, values above the ceiling become the
//! ceiling. Nothing downstream ever sees NaN or a negative volatility.
//!
//! ## Determinism
//! Pure functions of their inputs. No state, no I/O.

use serde::{Deserialize, Serialize};

use crate::config::ModelConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Multiplier applied to realized volatility to obtain implied volatility.
    pub implied_vol_skew: f64,
    /// Fraction of realized volatility reported as spread.
    pub spread_fraction: f64,
    /// Smallest volatility value ever reported.
    pub vol_floor: f64,
    /// Largest volatility value ever reported.
    pub vol_ceiling: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            implied_vol_skew: 1.10,
            spread_fraction: 0.10,
            vol_floor: 0.0,
            vol_ceiling: 10.0,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), ModelConfigError> {
        if !self.implied_vol_skew.is_finite() || self.implied_vol_skew <= 0.0 {
            return Err(ModelConfigError::InvalidSignal(format!(
                "implied_vol_skew must be > 0, got {}",
                self.implied_vol_skew
            )));
        }
        if !self.spread_fraction.is_finite() || self.spread_fraction < 0.0 {
            return Err(ModelConfigError::InvalidSignal(format!(
                "spread_fraction must be >= 0, got {}",
                self.spread_fraction
            )));
        }
        let (lo, hi) = (self.vol_floor, self.vol_ceiling);
        if !(lo.is_finite() && hi.is_finite() && lo >= 0.0 && lo < hi) {
            return Err(ModelConfigError::InvalidSignal(format!(
                "volatility bounds must satisfy 0 <= floor < ceiling, got [{lo}, {hi}]"
            )));
        }
        Ok(())
    }

    /// Force `x` into `[vol_floor, vol_ceiling]`; NaN maps to the floor.
    pub fn sanitize(&self, x: f64) -> f64 {
        if x.is_nan() || x < self.vol_floor {
            self.vol_floor
        } else if x > self.vol_ceiling {
            self.vol_ceiling
        } else {
            x
        }
    }
}

/// Published signal values for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Signals {
    pub realized_vol: f64,
    pub garch_forecast: f64,
    pub implied_vol: f64,
    pub spread: f64,
}

/// Derive the published signals for one tick.
pub fn synthesize(realized_vol: f64, forecast_variance: f64, cfg: &SignalConfig) -> Signals {
    let realized_vol = cfg.sanitize(realized_vol);

    // sqrt of a negative is NaN, which sanitize maps to the floor.
    let garch_forecast = cfg.sanitize(forecast_variance.sqrt());

    Signals {
        realized_vol,
        garch_forecast,
        implied_vol: cfg.sanitize(realized_vol * cfg.implied_vol_skew),
        spread: cfg.sanitize(realized_vol * cfg.spread_fraction),
    }
}
