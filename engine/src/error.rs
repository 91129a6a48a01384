use thiserror::Error;
use volatility::{InvalidTick, ModelConfigError, VolatilityRecord};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid tick: {0}")]
    InvalidTick(#[from] InvalidTick),

    #[error("invalid model configuration: {0}")]
    InvalidModelConfig(#[from] ModelConfigError),

    /// The record was produced and is queued for retry; the variance state
    /// already includes it.
    #[error("failed to persist record for {} at {}: {source:#}", record.pair, record.timestamp)]
    PersistenceWriteFailure {
        record: Box<VolatilityRecord>,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read history for {pair}: {source:#}")]
    PersistenceReadFailure {
        pair: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("write backlog for {pair} is full ({pending} records pending)")]
    BacklogFull { pair: String, pending: usize },

    #[error("worker for {pair} is unavailable")]
    WorkerUnavailable { pair: String },
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("no volatility records for {pair}")]
    NotFound { pair: String },

    #[error("failed to read history for {pair}: {source:#}")]
    ReadFailure {
        pair: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to list pairs: {0:#}")]
    ListFailure(#[source] anyhow::Error),
}
