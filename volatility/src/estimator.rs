//! Log-returns and rolling realized volatility.

use crate::rolling_window::ReturnWindow;
use crate::types::Tick;

/// Output of feeding one tick to the estimator.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EstimatorUpdate {
    /// `ln(p_t / p_{t-1})`; `None` for the first tick of a pair.
    pub log_return: Option<f64>,
    /// Annualized realized volatility; `None` until the window is full.
    pub realized_vol: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct RealizedVolEstimator {
    window: ReturnWindow,
    last_price: Option<f64>,
    annualization_scale: f64,
}

pub fn log_return(prev_price: f64, price: f64) -> f64 {
    (price / prev_price).ln()
}

impl RealizedVolEstimator {
    pub fn new(window_len: usize, annualization_scale: f64) -> Self {
        Self {
            window: ReturnWindow::new(window_len),
            last_price: None,
            annualization_scale,
        }
    }

    /// Rebuild from consecutive `(ts_ms, price)` observations, oldest first.
    ///
    /// Only the last `window_len + 1` points matter; earlier ones are evicted
    /// exactly as they would have been in a live run.
    pub fn from_prices(window_len: usize, annualization_scale: f64, prices: &[(u64, f64)]) -> Self {
        let mut est = Self::new(window_len, annualization_scale);
        for &(ts_ms, price) in prices {
            est.push_price(ts_ms, price);
        }
        est
    }

    pub fn observe(&mut self, tick: &Tick) -> EstimatorUpdate {
        let log_return = self.push_price(tick.ts_ms, tick.price);

        EstimatorUpdate {
            log_return,
            realized_vol: self.realized_vol(),
        }
    }

    fn push_price(&mut self, ts_ms: u64, price: f64) -> Option<f64> {
        let r = self.last_price.map(|prev| log_return(prev, price));
        if let Some(r) = r {
            self.window.push(ts_ms, r);
        }
        self.last_price = Some(price);
        r
    }

    /// `sqrt(mean(r²) - mean(r)²) * sqrt(scale)` once the window holds N returns.
    pub fn realized_vol(&self) -> Option<f64> {
        if !self.window.is_full() {
            return None;
        }
        self.window
            .variance()
            .map(|var| var.sqrt() * self.annualization_scale.sqrt())
    }

    pub fn window(&self) -> &ReturnWindow {
        &self.window
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }
}
