//! Seeded synthetic price paths for tests.
//!
//! Prices follow a GARCH(1,1) return process so that generated series
//! exhibit volatility clustering. The same seed always yields the same path.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::forecaster::GarchParams;

#[derive(Debug)]
pub struct GarchPathGenerator {
    rng: StdRng,
    params: GarchParams,
    variance: f64,
    price: f64,
}

impl GarchPathGenerator {
    /// Daily-scale GARCH parameters, started at their long-run variance.
    pub fn new(seed: u64, start_price: f64) -> Self {
        Self::with_params(seed, start_price, GarchParams::default())
    }

    pub fn with_params(seed: u64, start_price: f64, params: GarchParams) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            variance: params.long_run_variance(),
            params,
            price: start_price,
        }
    }

    /// Box-Muller standard normal draw.
    fn standard_normal(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.r#gen();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    pub fn next_return(&mut self) -> f64 {
        let r = self.variance.sqrt() * self.standard_normal();
        let GarchParams { omega, alpha, beta } = self.params;
        self.variance = omega + alpha * r * r + beta * self.variance;
        r
    }

    pub fn next_price(&mut self) -> f64 {
        let r = self.next_return();
        self.price *= r.exp();
        self.price
    }

    /// `n` ticks with timestamps `start_ts, start_ts + step, ...`.
    pub fn ticks(&mut self, n: usize, start_ts: u64, step_ms: u64) -> Vec<(u64, f64)> {
        (0..n as u64)
            .map(|i| (start_ts + i * step_ms, self.next_price()))
            .collect()
    }
}
