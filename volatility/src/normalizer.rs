//! Tick validation and timestamping.
//!
//! One normalizer exists per pair and is owned by that pair's pipeline, so
//! "last accepted timestamp" is tracked without any shared state.

use thiserror::Error;

use crate::types::Tick;

/// Why a raw observation was refused at ingestion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidTick {
    #[error("pair identifier is empty")]
    EmptyPair,

    #[error("price must be finite and > 0, got {price}")]
    NonPositivePrice { price: f64 },

    #[error("timestamp {ts_ms} is not after last accepted timestamp {last_ts_ms}")]
    NonMonotonic { ts_ms: u64, last_ts_ms: u64 },
}

#[derive(Clone, Debug, Default)]
pub struct TickNormalizer {
    last_ts_ms: Option<u64>,
}

impl TickNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume after a restart from the last persisted timestamp.
    pub fn resume_from(last_ts_ms: u64) -> Self {
        Self {
            last_ts_ms: Some(last_ts_ms),
        }
    }

    pub fn last_ts_ms(&self) -> Option<u64> {
        self.last_ts_ms
    }

    /// Validate `(pair, price, ts_ms?)` and stamp it.
    ///
    /// `now_ms` is only consulted when `ts_ms` is omitted. An assigned
    /// timestamp is bumped past the last accepted one if the clock has not
    /// moved (or moved backwards). Rejections leave the normalizer untouched.
    pub fn normalize(
        &mut self,
        pair: &str,
        price: f64,
        ts_ms: Option<u64>,
        now_ms: u64,
    ) -> Result<Tick, InvalidTick> {
        if pair.is_empty() {
            return Err(InvalidTick::EmptyPair);
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(InvalidTick::NonPositivePrice { price });
        }

        let ts_ms = match (ts_ms, self.last_ts_ms) {
            (Some(ts), Some(last)) if ts <= last => {
                return Err(InvalidTick::NonMonotonic {
                    ts_ms: ts,
                    last_ts_ms: last,
                });
            }
            (Some(ts), _) => ts,
            (None, Some(last)) => now_ms.max(last.saturating_add(1)),
            (None, None) => now_ms,
        };

        self.last_ts_ms = Some(ts_ms);

        Ok(Tick {
            pair: pair.to_string(),
            ts_ms,
            price,
        })
    }
}
