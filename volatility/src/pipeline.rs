//! Per-pair sequential pipeline.
//!
//! A `PairPipeline` owns every piece of mutable state for one pair (the
//! normalizer clock, the return window and the variance state). Ticks must be
//! fed one at a time and in order; the GARCH recursion is not commutative.
//! Whoever owns the pipeline (the engine's pair worker) provides that
//! serialization.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{ModelConfig, ModelConfigError};
use crate::estimator::{RealizedVolEstimator, log_return};
use crate::forecaster::GarchForecaster;
use crate::normalizer::{InvalidTick, TickNormalizer};
use crate::synthesizer::synthesize;
use crate::types::{Tick, VarianceState, VolatilityRecord};

/// Validated model configuration plus the forecaster built from it.
///
/// Shared read-only by all pair pipelines.
#[derive(Clone, Debug)]
pub struct VolatilityModel {
    config: ModelConfig,
    forecaster: GarchForecaster,
}

impl VolatilityModel {
    pub fn new(config: ModelConfig) -> Result<Self, ModelConfigError> {
        let forecaster = GarchForecaster::from_config(&config)?;
        Ok(Self { config, forecaster })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn forecaster(&self) -> &GarchForecaster {
        &self.forecaster
    }

    /// Number of trailing records needed to rebuild a pair exactly.
    pub fn restore_depth(&self) -> usize {
        self.config.window_len + 1
    }

    /// σ²_{t+1|t} implied by the tail of a pair's history (ascending).
    pub fn next_variance(&self, history: &[VolatilityRecord]) -> Option<f64> {
        let run = self.consecutive_tail(history);
        let last = run.last()?;
        Some(
            self.forecaster
                .restore_variance(last.garch_variance, last_return(run), last.garch_forecast),
        )
    }

    /// Longest trailing run of records emitted by back-to-back ticks.
    ///
    /// Records are not contiguous across a warm-up gap (ticks that emitted
    /// nothing after a short restore), so a return between two records is only
    /// trusted when replaying it reproduces what both records report.
    pub fn consecutive_tail<'a>(&self, history: &'a [VolatilityRecord]) -> &'a [VolatilityRecord] {
        let mut start = history.len().saturating_sub(1);
        while start > 0 && self.follows(&history[start - 1], &history[start]) {
            start -= 1;
        }
        &history[start..]
    }

    /// `next` was emitted by the tick immediately after `prev`'s.
    fn follows(&self, prev: &VolatilityRecord, next: &VolatilityRecord) -> bool {
        if next.timestamp <= prev.timestamp {
            return false;
        }
        let (replayed, _) = self
            .forecaster
            .step(next.garch_variance, log_return(prev.price, next.price));

        self.reported_vol(next.garch_variance) == prev.garch_forecast
            && self.reported_vol(replayed) == next.garch_forecast
    }

    /// The `garch_forecast` a record carries for a post-update variance.
    fn reported_vol(&self, variance: f64) -> f64 {
        self.config.signals.sanitize(variance.sqrt())
    }
}

fn last_return(run: &[VolatilityRecord]) -> Option<f64> {
    match run {
        [.., prev, last] => Some(log_return(prev.price, last.price)),
        _ => None,
    }
}

/// Result of pushing one accepted tick through the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutcome {
    pub tick: Tick,
    /// `None` while the return window is still warming up.
    pub record: Option<VolatilityRecord>,
    /// The variance update was clamped to the ceiling.
    pub ceiling_hit: bool,
}

#[derive(Clone, Debug)]
pub struct PairPipeline {
    pair: String,
    model: Arc<VolatilityModel>,
    normalizer: TickNormalizer,
    estimator: RealizedVolEstimator,
    state: VarianceState,
}

impl PairPipeline {
    pub fn new(pair: impl Into<String>, model: Arc<VolatilityModel>) -> Self {
        let cfg = model.config();
        Self {
            pair: pair.into(),
            normalizer: TickNormalizer::new(),
            estimator: RealizedVolEstimator::new(cfg.window_len, cfg.annualization_scale),
            state: model.forecaster().seed_state(),
            model,
        }
    }

    /// Resume a pair from the tail of its persisted history (ascending).
    ///
    /// The last `window_len + 1` records are enough to rebuild the return
    /// window and replay the final variance step bit-for-bit. Only the trailing
    /// run of back-to-back records is used: with a shorter run the window is
    /// partially refilled and warms up again, and a lone record restores the
    /// variance from its reported forecast. With no history the pair starts
    /// from the seed variance.
    pub fn restore(
        pair: impl Into<String>,
        model: Arc<VolatilityModel>,
        history: &[VolatilityRecord],
    ) -> Self {
        let pair = pair.into();
        let Some(last) = history.last() else {
            return Self::new(pair, model);
        };

        let cfg = model.config();
        let tail = &history[history.len().saturating_sub(model.restore_depth())..];
        let run = model.consecutive_tail(tail);
        let prices: Vec<(u64, f64)> = run.iter().map(|r| (r.timestamp, r.price)).collect();
        let estimator =
            RealizedVolEstimator::from_prices(cfg.window_len, cfg.annualization_scale, &prices);

        let r = last_return(run);
        let conditional_variance = model
            .forecaster()
            .restore_variance(last.garch_variance, r, last.garch_forecast);

        if run.len() < model.restore_depth() {
            warn!(
                pair = %pair,
                records = tail.len(),
                consecutive = run.len(),
                needed = model.restore_depth(),
                "short history; return window will warm up again"
            );
        }

        debug!(
            pair = %pair,
            last_ts_ms = last.timestamp,
            conditional_variance,
            window = estimator.window().len(),
            "pair state restored"
        );

        Self {
            pair,
            normalizer: TickNormalizer::resume_from(last.timestamp),
            estimator,
            state: VarianceState {
                conditional_variance,
                last_return: r.unwrap_or(0.0),
                tick_count: 0,
            },
            model,
        }
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn state(&self) -> &VarianceState {
        &self.state
    }

    pub fn estimator(&self) -> &RealizedVolEstimator {
        &self.estimator
    }

    pub fn last_ts_ms(&self) -> Option<u64> {
        self.normalizer.last_ts_ms()
    }

    /// Normalize, estimate, filter and synthesize one observation.
    ///
    /// A rejected tick leaves every piece of state untouched.
    pub fn process(
        &mut self,
        price: f64,
        ts_ms: Option<u64>,
        now_ms: u64,
    ) -> Result<TickOutcome, InvalidTick> {
        let tick = self.normalizer.normalize(&self.pair, price, ts_ms, now_ms)?;
        let est = self.estimator.observe(&tick);

        let update = est
            .log_return
            .map(|r| self.model.forecaster().update(&mut self.state, r));

        let ceiling_hit = update.is_some_and(|u| u.ceiling_hit);

        let record = match (est.realized_vol, update) {
            (Some(realized_vol), Some(u)) => {
                let s = synthesize(realized_vol, u.forecast, &self.model.config().signals);
                Some(VolatilityRecord {
                    pair: self.pair.clone(),
                    timestamp: tick.ts_ms,
                    price: tick.price,
                    realized_vol: s.realized_vol,
                    garch_variance: u.variance,
                    garch_forecast: s.garch_forecast,
                    implied_vol: s.implied_vol,
                    spread: s.spread,
                })
            }
            _ => None,
        };

        Ok(TickOutcome {
            tick,
            record,
            ceiling_hit,
        })
    }
}
