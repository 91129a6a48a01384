//! GARCH(1,1) conditional-variance filter.
//!
//! For each return `r_t` with current state `σ²_t`:
//!
//! ```text
//! σ²_{t+1|t} = ω + α·r_t² + β·σ²_t
//! ```
//!
//! `σ²_t` is what the record reports as `garch_variance`; the new value is
//! both the one-step-ahead forecast and the next state. Parameters are fixed
//! configuration; stationarity (`α + β < 1`) is checked at construction.

use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, ModelConfigError};
use crate::types::VarianceState;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GarchParams {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl Default for GarchParams {
    fn default() -> Self {
        Self {
            omega: 0.00001,
            alpha: 0.05,
            beta: 0.90,
        }
    }
}

impl GarchParams {
    pub fn validate(&self) -> Result<(), ModelConfigError> {
        if !self.omega.is_finite() || self.omega <= 0.0 {
            return Err(ModelConfigError::InvalidOmega(self.omega));
        }
        for (name, value) in [("alpha", self.alpha), ("beta", self.beta)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ModelConfigError::NegativeCoefficient { name, value });
            }
        }
        if self.persistence() >= 1.0 {
            return Err(ModelConfigError::NonStationary {
                persistence: self.persistence(),
            });
        }
        Ok(())
    }

    /// `α + β`
    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// Unconditional variance `ω / (1 - α - β)`.
    pub fn long_run_variance(&self) -> f64 {
        self.omega / (1.0 - self.persistence())
    }

    /// Ticks for a variance shock to decay by half. `None` without persistence.
    pub fn half_life(&self) -> Option<f64> {
        let p = self.persistence();
        (p > 0.0 && p < 1.0).then(|| 0.5f64.ln() / p.ln())
    }
}

/// Result of absorbing one return.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VarianceUpdate {
    /// σ²_t, the variance in force for the absorbed return.
    pub variance: f64,
    /// σ²_{t+1|t}, after clamping.
    pub forecast: f64,
    /// The raw update exceeded the ceiling (or was not finite) and was clamped.
    pub ceiling_hit: bool,
}

#[derive(Clone, Debug)]
pub struct GarchForecaster {
    params: GarchParams,
    floor: f64,
    ceiling: f64,
    seed: f64,
}

impl GarchForecaster {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self, ModelConfigError> {
        cfg.validate()?;
        Ok(Self {
            params: cfg.garch,
            floor: cfg.variance_floor,
            ceiling: cfg.variance_ceiling,
            seed: cfg.seed(),
        })
    }

    pub fn params(&self) -> &GarchParams {
        &self.params
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.floor, self.ceiling)
    }

    pub fn seed_state(&self) -> VarianceState {
        VarianceState::seeded(self.seed)
    }

    /// One raw filter step followed by the floor/ceiling policy.
    pub fn step(&self, variance: f64, r: f64) -> (f64, bool) {
        let GarchParams { omega, alpha, beta } = self.params;
        let raw = omega + alpha * r * r + beta * variance;
        self.clamp(raw)
    }

    fn clamp(&self, raw: f64) -> (f64, bool) {
        if !raw.is_finite() || raw > self.ceiling {
            (self.ceiling, true)
        } else if raw < self.floor {
            (self.floor, false)
        } else {
            (raw, false)
        }
    }

    /// Absorb `r` into `state`. The only way a `VarianceState` changes.
    pub fn update(&self, state: &mut VarianceState, r: f64) -> VarianceUpdate {
        let variance = state.conditional_variance;
        let (forecast, ceiling_hit) = self.step(variance, r);

        state.conditional_variance = forecast;
        state.last_return = r;
        state.tick_count += 1;

        VarianceUpdate {
            variance,
            forecast,
            ceiling_hit,
        }
    }

    /// h-step-ahead variance given the one-step forecast σ²_{t+1|t}.
    ///
    /// `σ²_{t+h|t} = V_L + (α+β)^{h-1} · (σ²_{t+1|t} - V_L)`; `h = 0` is
    /// treated as 1.
    pub fn forecast_ahead(&self, next_variance: f64, horizon: u32) -> f64 {
        let long_run = self.params.long_run_variance();
        let steps = horizon.max(1) - 1;
        let decay = self.params.persistence().powi(steps as i32);
        self.clamp(long_run + decay * (next_variance - long_run)).0
    }

    /// Recover σ²_{t+1|t} from the last persisted snapshot of a pair.
    ///
    /// With the tick's return known the step is replayed exactly; otherwise
    /// the reported forecast volatility is squared back into a variance.
    pub fn restore_variance(
        &self,
        garch_variance: f64,
        last_return: Option<f64>,
        garch_forecast: f64,
    ) -> f64 {
        match last_return {
            Some(r) => self.step(garch_variance, r).0,
            None => self.clamp(garch_forecast * garch_forecast).0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecaster_with_seed(seed: f64) -> GarchForecaster {
        GarchForecaster::from_config(&ModelConfig {
            seed_variance: Some(seed),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn worked_example_matches_closed_form() {
        let f = forecaster_with_seed(0.04);
        let mut state = f.seed_state();

        let u = f.update(&mut state, 0.01);

        // 0.00001 + 0.05 * 0.0001 + 0.90 * 0.04
        assert!((u.forecast - 0.036015).abs() < 1e-15);
        assert_eq!(u.variance, 0.04);
        assert!((u.forecast.sqrt() - 0.18977).abs() < 1e-5);
        assert!(!u.ceiling_hit);

        assert_eq!(state.conditional_variance, u.forecast);
        assert_eq!(state.last_return, 0.01);
        assert_eq!(state.tick_count, 1);
    }

    #[test]
    fn default_seed_is_long_run_variance() {
        let f = GarchForecaster::from_config(&ModelConfig::default()).unwrap();
        let lr = f.params().long_run_variance();
        assert_eq!(f.seed_state().conditional_variance, lr);
    }

    #[test]
    fn non_stationary_model_fails_fast() {
        let cfg = ModelConfig {
            garch: GarchParams {
                omega: 0.0001,
                alpha: 0.5,
                beta: 0.6,
            },
            ..Default::default()
        };
        assert!(matches!(
            GarchForecaster::from_config(&cfg),
            Err(ModelConfigError::NonStationary { .. })
        ));
    }

    #[test]
    fn zero_omega_and_negative_alpha_are_rejected() {
        let zero_omega = GarchParams {
            omega: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            zero_omega.validate(),
            Err(ModelConfigError::InvalidOmega(_))
        ));

        let negative_alpha = GarchParams {
            alpha: -0.1,
            ..Default::default()
        };
        assert!(matches!(
            negative_alpha.validate(),
            Err(ModelConfigError::NegativeCoefficient { name: "alpha", .. })
        ));
    }

    #[test]
    fn huge_return_is_clamped_to_ceiling_as_soft_fault() {
        let f = GarchForecaster::from_config(&ModelConfig {
            variance_ceiling: 0.01,
            ..Default::default()
        })
        .unwrap();
        let mut state = f.seed_state();

        let u = f.update(&mut state, 5.0);

        assert!(u.ceiling_hit);
        assert_eq!(u.forecast, 0.01);
        assert_eq!(state.conditional_variance, 0.01);
    }

    #[test]
    fn non_finite_update_is_clamped_to_ceiling() {
        let f = forecaster_with_seed(0.04);
        let (v, hit) = f.step(0.04, f64::INFINITY);
        assert!(hit);
        assert_eq!(v, f.bounds().1);
    }

    #[test]
    fn multi_step_forecast_reverts_to_long_run_variance() {
        let f = forecaster_with_seed(0.04);
        let next = 0.036015;
        let lr = f.params().long_run_variance();

        assert_eq!(f.forecast_ahead(next, 1), next);
        assert_eq!(f.forecast_ahead(next, 0), next);

        let h2 = f.forecast_ahead(next, 2);
        assert!((h2 - (lr + 0.95 * (next - lr))).abs() < 1e-15);

        let far = f.forecast_ahead(next, 2_000);
        assert!((far - lr).abs() < 1e-12);
    }

    #[test]
    fn half_life_of_default_model() {
        let hl = GarchParams::default().half_life().unwrap();
        // ln(0.5) / ln(0.95)
        assert!((hl - 13.5134).abs() < 1e-3);

        let no_memory = GarchParams {
            omega: 0.1,
            alpha: 0.0,
            beta: 0.0,
        };
        assert_eq!(no_memory.half_life(), None);
    }

    #[test]
    fn restore_replays_the_last_step_exactly() {
        let f = forecaster_with_seed(0.04);
        let mut state = f.seed_state();
        let u = f.update(&mut state, -0.013);

        let restored = f.restore_variance(u.variance, Some(-0.013), u.forecast.sqrt());
        assert_eq!(restored, state.conditional_variance);
    }
}
