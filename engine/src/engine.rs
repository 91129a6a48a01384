use std::sync::Arc;

use history::VolatilityStore;
use tracing::{info, warn};
use volatility::pipeline::VolatilityModel;
use volatility::{InvalidTick, ModelConfig, VolatilityRecord};

use crate::config::{EngineConfig, WorkerSettings};
use crate::error::EngineError;
use crate::metrics::{Counters, bump};
use crate::query::QueryService;
use crate::router::PairRouter;
use crate::worker::PairCommand;

/// Entry point for tick ingestion.
///
/// Cheap to share behind an `Arc`; all per-pair state lives in workers.
pub struct VolatilityEngine {
    model: Arc<VolatilityModel>,
    store: Arc<dyn VolatilityStore>,
    router: PairRouter,
    settings: WorkerSettings,
    counters: Counters,
}

impl VolatilityEngine {
    /// Validates the model; an invalid configuration never starts an engine.
    pub fn new(
        model: ModelConfig,
        store: Arc<dyn VolatilityStore>,
        settings: WorkerSettings,
    ) -> Result<Self, EngineError> {
        let model = Arc::new(VolatilityModel::new(model)?);
        let counters = Counters::default();

        let params = model.forecaster().params();
        info!(
            window_len = model.config().window_len,
            omega = params.omega,
            alpha = params.alpha,
            beta = params.beta,
            persistence = params.persistence(),
            long_run_variance = params.long_run_variance(),
            half_life_ticks = ?params.half_life(),
            "volatility model ready"
        );

        Ok(Self {
            router: PairRouter::new(
                model.clone(),
                store.clone(),
                settings.clone(),
                counters.clone(),
            ),
            model,
            store,
            settings,
            counters,
        })
    }

    /// Open the configured store and build an engine on it.
    pub async fn from_config(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let store = cfg.open_store().await?;
        Ok(Self::new(cfg.model.clone(), store, cfg.worker.clone())?)
    }

    /// Feed one observation. `ts_ms = None` stamps it with the current time.
    ///
    /// Returns the persisted record, or `None` while the pair is warming up.
    pub async fn ingest(
        &self,
        pair: &str,
        price: f64,
        ts_ms: Option<u64>,
    ) -> Result<Option<VolatilityRecord>, EngineError> {
        if pair.is_empty() {
            bump(&self.counters.ticks_rejected);
            warn!(price, "tick rejected: empty pair");
            return Err(InvalidTick::EmptyPair.into());
        }

        let now_ms = common::time::now_ms();

        self.router
            .request(pair, |reply| PairCommand::Tick {
                price,
                ts_ms,
                now_ms,
                reply,
            })
            .await
    }

    /// Re-attempt records whose persistence failed earlier.
    ///
    /// Returns how many records were written (or found already present).
    /// A pair without a running worker has nothing pending.
    pub async fn retry_pending(&self, pair: &str) -> Result<usize, EngineError> {
        self.router
            .request_existing(pair, |reply| PairCommand::Flush { reply })
            .await
            .unwrap_or(Ok(0))
    }

    /// Read-only view over the same store.
    pub fn query(&self) -> QueryService {
        QueryService::new(
            self.store.clone(),
            self.model.clone(),
            self.settings.slow_io_budget,
        )
    }

    pub fn model(&self) -> &VolatilityModel {
        &self.model
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn active_pairs(&self) -> Vec<String> {
        self.router.active_pairs()
    }
}
