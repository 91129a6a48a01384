use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::forecaster::GarchParams;
use crate::synthesizer::SignalConfig;

/// Rejected model configuration. The engine refuses to start on any of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelConfigError {
    #[error("omega must be finite and > 0, got {0}")]
    InvalidOmega(f64),

    #[error("{name} must be finite and >= 0, got {value}")]
    NegativeCoefficient { name: &'static str, value: f64 },

    #[error("non-stationary GARCH parameters: alpha + beta = {persistence} (must be < 1)")]
    NonStationary { persistence: f64 },

    #[error("variance bounds must satisfy 0 < floor < ceiling, got [{floor}, {ceiling}]")]
    InvalidVarianceBounds { floor: f64, ceiling: f64 },

    #[error("seed variance {seed} outside [{floor}, {ceiling}]")]
    SeedOutOfBounds { seed: f64, floor: f64, ceiling: f64 },

    #[error("return window length must be >= 1")]
    EmptyWindow,

    #[error("annualization scale must be finite and > 0, got {0}")]
    InvalidScale(f64),

    #[error("invalid signal configuration: {0}")]
    InvalidSignal(String),
}

/// Fixed model constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of returns in the realized-volatility window (N).
    pub window_len: usize,

    /// Periods per year used to annualize realized volatility.
    pub annualization_scale: f64,

    pub garch: GarchParams,

    /// Lower bound for the conditional variance; keeps sqrt() well-defined.
    pub variance_floor: f64,

    /// Upper bound for the conditional variance. Hitting it is a soft fault.
    pub variance_ceiling: f64,

    /// Initial σ² for a pair with no history. `None` uses the long-run variance.
    pub seed_variance: Option<f64>,

    pub signals: SignalConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            window_len: 20,
            annualization_scale: 252.0,
            garch: GarchParams::default(),
            variance_floor: 1e-12,
            variance_ceiling: 1.0,
            seed_variance: None,
            signals: SignalConfig::default(),
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ModelConfigError> {
        if self.window_len == 0 {
            return Err(ModelConfigError::EmptyWindow);
        }
        if !self.annualization_scale.is_finite() || self.annualization_scale <= 0.0 {
            return Err(ModelConfigError::InvalidScale(self.annualization_scale));
        }

        self.garch.validate()?;

        let (floor, ceiling) = (self.variance_floor, self.variance_ceiling);
        if !(floor.is_finite() && ceiling.is_finite() && floor > 0.0 && floor < ceiling) {
            return Err(ModelConfigError::InvalidVarianceBounds { floor, ceiling });
        }

        let seed = self.seed();
        if !(seed >= floor && seed <= ceiling) {
            return Err(ModelConfigError::SeedOutOfBounds {
                seed,
                floor,
                ceiling,
            });
        }

        self.signals.validate()
    }

    /// Seed variance for a pair with no prior state.
    pub fn seed(&self) -> f64 {
        self.seed_variance
            .unwrap_or_else(|| self.garch.long_run_variance())
    }
}
