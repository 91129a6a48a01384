//! Read-only access to persisted volatility.
//!
//! Queries go straight to the store and never touch a pair worker, so a slow
//! reader cannot hold up ingestion.

use std::sync::Arc;
use std::time::Duration;

use common::logger::warn_if_slow;
use history::VolatilityStore;
use serde::Serialize;
use tracing::instrument;
use volatility::pipeline::VolatilityModel;
use volatility::{VolRegime, VolatilityRecord};

use crate::error::QueryError;

/// One point of the forecast term structure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TermPoint {
    /// Steps ahead of the latest record.
    pub horizon: u32,
    pub variance: f64,
    /// `sqrt(variance)`, same units as `garch_forecast`.
    pub volatility: f64,
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn VolatilityStore>,
    model: Arc<VolatilityModel>,
    slow_io_budget: Duration,
}

impl QueryService {
    pub fn new(
        store: Arc<dyn VolatilityStore>,
        model: Arc<VolatilityModel>,
        slow_io_budget: Duration,
    ) -> Self {
        Self {
            store,
            model,
            slow_io_budget,
        }
    }

    async fn history(
        &self,
        pair: &str,
        limit: Option<usize>,
    ) -> Result<Vec<VolatilityRecord>, QueryError> {
        warn_if_slow(
            "history.read_history",
            self.slow_io_budget,
            self.store.read_history(pair, limit),
        )
        .await
        .map_err(|source| QueryError::ReadFailure {
            pair: pair.to_string(),
            source,
        })
    }

    #[instrument(skip(self), target = "query")]
    pub async fn get_latest(&self, pair: &str) -> Result<VolatilityRecord, QueryError> {
        warn_if_slow(
            "history.read_latest",
            self.slow_io_budget,
            self.store.read_latest(pair),
        )
        .await
        .map_err(|source| QueryError::ReadFailure {
            pair: pair.to_string(),
            source,
        })?
        .ok_or_else(|| QueryError::NotFound {
            pair: pair.to_string(),
        })
    }

    /// Ascending by timestamp; `limit` keeps the most recent records.
    /// An unknown pair yields an empty history.
    #[instrument(skip(self), target = "query")]
    pub async fn get_history(
        &self,
        pair: &str,
        limit: Option<usize>,
    ) -> Result<Vec<VolatilityRecord>, QueryError> {
        self.history(pair, limit).await
    }

    /// Variance forecasts `horizons` steps past the latest record, reverting
    /// towards the model's long-run variance.
    #[instrument(skip(self), target = "query")]
    pub async fn get_term_structure(
        &self,
        pair: &str,
        horizons: &[u32],
    ) -> Result<Vec<TermPoint>, QueryError> {
        let tail = self.history(pair, Some(2)).await?;
        let next = self
            .model
            .next_variance(&tail)
            .ok_or_else(|| QueryError::NotFound {
                pair: pair.to_string(),
            })?;

        let forecaster = self.model.forecaster();
        Ok(horizons
            .iter()
            .map(|&horizon| {
                let variance = forecaster.forecast_ahead(next, horizon);
                TermPoint {
                    horizon,
                    variance,
                    volatility: variance.sqrt(),
                }
            })
            .collect())
    }

    pub async fn get_regime(&self, pair: &str) -> Result<VolRegime, QueryError> {
        Ok(self.get_latest(pair).await?.regime())
    }

    pub async fn list_pairs(&self) -> Result<Vec<String>, QueryError> {
        warn_if_slow("history.pairs", self.slow_io_budget, self.store.pairs())
            .await
            .map_err(QueryError::ListFailure)
    }
}
