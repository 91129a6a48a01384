//! Per-pair worker.
//!
//! A `PairWorker` is the only owner of a pair's pipeline. It processes
//! commands strictly in arrival order, so ticks for one pair never race and
//! records reach the store in timestamp order.
//!
//! Records are queued in an ordered backlog before being appended. A failed
//! append leaves the record (and everything behind it) in the backlog; it is
//! re-attempted before the next record is written or on an explicit flush.
//! The store's `(pair, timestamp)` de-duplication makes re-delivery harmless.

use std::collections::VecDeque;
use std::sync::Arc;

use history::{AppendOutcome, VolatilityStore};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, error, info, instrument, warn};
use volatility::VolatilityRecord;
use volatility::pipeline::{PairPipeline, VolatilityModel};

use common::logger::{pair_span, warn_if_slow};

use crate::config::WorkerSettings;
use crate::error::EngineError;
use crate::metrics::{Counters, bump};

pub type TickReply = Result<Option<VolatilityRecord>, EngineError>;

pub enum PairCommand {
    Tick {
        price: f64,
        ts_ms: Option<u64>,
        now_ms: u64,
        reply: oneshot::Sender<TickReply>,
    },
    /// Re-attempt the backlog; replies with the number of records drained.
    Flush {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
}

pub struct PairWorker {
    pipeline: PairPipeline,
    store: Arc<dyn VolatilityStore>,
    backlog: VecDeque<VolatilityRecord>,
    settings: WorkerSettings,
    counters: Counters,
}

impl PairWorker {
    /// Rebuild a pair's state from the tail of its persisted history.
    pub async fn restore(
        pair: &str,
        model: Arc<VolatilityModel>,
        store: Arc<dyn VolatilityStore>,
        settings: WorkerSettings,
        counters: Counters,
    ) -> Result<Self, EngineError> {
        let depth = model.restore_depth();

        let history = warn_if_slow(
            "history.read_history",
            settings.slow_io_budget,
            store.read_history(pair, Some(depth)),
        )
        .await
        .map_err(|source| EngineError::PersistenceReadFailure {
            pair: pair.to_string(),
            source,
        })?;

        info!(
            pair,
            restored_records = history.len(),
            last_ts_ms = ?history.last().map(|r| r.timestamp),
            "pair worker restored"
        );

        Ok(Self {
            pipeline: PairPipeline::restore(pair, model, &history),
            store,
            backlog: VecDeque::new(),
            settings,
            counters,
        })
    }

    pub fn pair(&self) -> &str {
        self.pipeline.pair()
    }

    /// Worker loop. Exits when every sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<PairCommand>) {
        let span = pair_span("worker", self.pair());

        async move {
            debug!("worker started");

            while let Some(cmd) = rx.recv().await {
                match cmd {
                    PairCommand::Tick {
                        price,
                        ts_ms,
                        now_ms,
                        reply,
                    } => {
                        let res = self.on_tick(price, ts_ms, now_ms).await;
                        // Caller may have gone away; the tick is applied regardless.
                        let _ = reply.send(res);
                    }
                    PairCommand::Flush { reply } => {
                        let res = self.flush().await;
                        let _ = reply.send(res);
                    }
                }
            }

            if !self.backlog.is_empty() {
                warn!(
                    pending = self.backlog.len(),
                    "worker exiting with uncommitted records"
                );
            }
            debug!("worker stopped");
        }
        .instrument(span)
        .await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn on_tick(&mut self, price: f64, ts_ms: Option<u64>, now_ms: u64) -> TickReply {
        if self.backlog.len() >= self.settings.max_pending_records {
            // Last chance to make room before refusing.
            let _ = self.flush().await;
            if self.backlog.len() >= self.settings.max_pending_records {
                warn!(pending = self.backlog.len(), "write backlog full; tick refused");
                return Err(EngineError::BacklogFull {
                    pair: self.pair().to_string(),
                    pending: self.backlog.len(),
                });
            }
        }

        let outcome = match self.pipeline.process(price, ts_ms, now_ms) {
            Ok(o) => o,
            Err(e) => {
                bump(&self.counters.ticks_rejected);
                warn!(price, ts_ms = ?ts_ms, reason = %e, "tick rejected");
                return Err(e.into());
            }
        };
        bump(&self.counters.ticks_accepted);

        if outcome.ceiling_hit {
            bump(&self.counters.ceiling_hits);
            warn!(
                ts_ms = outcome.tick.ts_ms,
                variance = self.pipeline.state().conditional_variance,
                "conditional variance clamped to ceiling"
            );
        }

        let Some(record) = outcome.record else {
            debug!(
                ts_ms = outcome.tick.ts_ms,
                window = self.pipeline.estimator().window().len(),
                "warming up"
            );
            return Ok(None);
        };
        bump(&self.counters.records_emitted);

        self.backlog.push_back(record.clone());

        match self.flush().await {
            Ok(_) => Ok(Some(record)),
            Err(EngineError::PersistenceWriteFailure { source, .. }) => {
                Err(EngineError::PersistenceWriteFailure {
                    record: Box::new(record),
                    source,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Append queued records in order, stopping at the first failure.
    #[instrument(skip(self), level = "debug", fields(pending = self.backlog.len()))]
    pub async fn flush(&mut self) -> Result<usize, EngineError> {
        let mut drained = 0;

        while let Some(record) = self.backlog.front() {
            let res = warn_if_slow(
                "history.append",
                self.settings.slow_io_budget,
                self.store.append(record),
            )
            .await;

            match res {
                Ok(AppendOutcome::Committed) => {
                    bump(&self.counters.records_committed);
                }
                Ok(AppendOutcome::Duplicate) => {
                    bump(&self.counters.duplicate_appends);
                    debug!(ts_ms = record.timestamp, "record already persisted");
                }
                Err(source) => {
                    bump(&self.counters.persistence_failures);
                    error!(
                        ts_ms = record.timestamp,
                        pending = self.backlog.len(),
                        error = %format!("{source:#}"),
                        "failed to persist record; kept for retry"
                    );
                    return Err(EngineError::PersistenceWriteFailure {
                        record: Box::new(record.clone()),
                        source,
                    });
                }
            }

            self.backlog.pop_front();
            drained += 1;
        }

        Ok(drained)
    }
}
