//! Routes commands into per-pair worker queues.
//!
//! Guarantees:
//! - FIFO processing per pair
//! - isolation between pairs
//! - bounded memory via per-pair channel capacity
//!
//! The sender map is locked only for lookup and insert. A new worker's
//! history is read before the lock is taken; if two callers race to start the
//! same pair, the loser's restored worker is discarded unused.

use std::collections::HashMap;
use std::sync::Arc;

use history::VolatilityStore;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use volatility::pipeline::VolatilityModel;

use crate::config::WorkerSettings;
use crate::error::EngineError;
use crate::metrics::Counters;
use crate::worker::{PairCommand, PairWorker};

pub struct PairRouter {
    model: Arc<VolatilityModel>,
    store: Arc<dyn VolatilityStore>,
    settings: WorkerSettings,
    counters: Counters,

    /// Active worker channels keyed by pair.
    workers: Mutex<HashMap<String, mpsc::Sender<PairCommand>>>,
}

impl PairRouter {
    pub fn new(
        model: Arc<VolatilityModel>,
        store: Arc<dyn VolatilityStore>,
        settings: WorkerSettings,
        counters: Counters,
    ) -> Self {
        Self {
            model,
            store,
            settings,
            counters,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn existing(&self, pair: &str) -> Option<mpsc::Sender<PairCommand>> {
        let mut workers = self.workers.lock();
        match workers.get(pair) {
            Some(tx) if !tx.is_closed() => Some(tx.clone()),
            Some(_) => {
                // Worker died; drop the sender so it can be recreated.
                warn!(pair, "worker channel closed; purging sender");
                workers.remove(pair);
                None
            }
            None => None,
        }
    }

    /// Returns an existing worker sender or restores and spawns a worker.
    async fn get_or_spawn_worker(
        &self,
        pair: &str,
    ) -> Result<mpsc::Sender<PairCommand>, EngineError> {
        if let Some(tx) = self.existing(pair) {
            return Ok(tx);
        }

        let worker = PairWorker::restore(
            pair,
            self.model.clone(),
            self.store.clone(),
            self.settings.clone(),
            self.counters.clone(),
        )
        .await?;

        let mut workers = self.workers.lock();
        if let Some(tx) = workers.get(pair).filter(|tx| !tx.is_closed()) {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        tokio::spawn(worker.run(rx));
        workers.insert(pair.to_string(), tx.clone());

        info!(pair, active_pairs = workers.len(), "spawned new pair worker");
        Ok(tx)
    }

    /// Send a command built around a fresh reply channel and await the reply.
    pub async fn request<T>(
        &self,
        pair: &str,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> PairCommand,
    ) -> Result<T, EngineError> {
        let tx = self.get_or_spawn_worker(pair).await?;
        self.send(pair, &tx, build).await
    }

    /// Like [`request`](Self::request) but never starts a worker.
    pub async fn request_existing<T>(
        &self,
        pair: &str,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> PairCommand,
    ) -> Option<Result<T, EngineError>> {
        let tx = self.existing(pair)?;
        Some(self.send(pair, &tx, build).await)
    }

    async fn send<T>(
        &self,
        pair: &str,
        tx: &mpsc::Sender<PairCommand>,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> PairCommand,
    ) -> Result<T, EngineError> {
        let unavailable = || EngineError::WorkerUnavailable {
            pair: pair.to_string(),
        };

        let (reply_tx, reply_rx) = oneshot::channel();

        if tx.send(build(reply_tx)).await.is_err() {
            warn!(pair, "worker channel closed; purging sender");
            self.workers.lock().remove(pair);
            return Err(unavailable());
        }

        reply_rx.await.map_err(|_| unavailable())?
    }

    /// Pairs with a running worker, sorted.
    pub fn active_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.workers.lock().keys().cloned().collect();
        pairs.sort();
        pairs
    }
}
