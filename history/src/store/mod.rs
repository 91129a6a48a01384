pub mod jsonl_store;
pub mod sqlite_store;

use thiserror::Error;
use volatility::VolatilityRecord;

/// What an accepted `append` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Durably written and visible to readers.
    Committed,
    /// A record with the same `(pair, timestamp)` already exists; nothing written.
    Duplicate,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("out-of-order append for {pair}: ts {ts_ms} precedes latest {latest_ts_ms}")]
    OutOfOrder {
        pair: String,
        ts_ms: u64,
        latest_ts_ms: u64,
    },

    #[error("record for {pair} at {ts_ms} has a non-finite {field}")]
    NonFinite {
        pair: String,
        ts_ms: u64,
        field: &'static str,
    },

    #[error("corrupt history at {location} line {line}: {reason}")]
    Corrupt {
        location: String,
        line: usize,
        reason: String,
    },
}

/// Append-only, per-pair, timestamp-ordered record log.
///
/// Implementations guarantee that an `append` is either fully visible to
/// later reads or not at all, and that `(pair, timestamp)` is unique.
#[async_trait::async_trait]
pub trait VolatilityStore: Send + Sync {
    async fn append(&self, record: &VolatilityRecord) -> anyhow::Result<AppendOutcome>;

    async fn read_latest(&self, pair: &str) -> anyhow::Result<Option<VolatilityRecord>>;

    /// Ascending by timestamp; with `Some(k)`, the most recent `k` records.
    async fn read_history(
        &self,
        pair: &str,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<VolatilityRecord>>;

    /// Pairs with at least one committed record, sorted.
    async fn pairs(&self) -> anyhow::Result<Vec<String>>;
}

/// Reject records that could not be written losslessly.
pub fn check_finite(record: &VolatilityRecord) -> Result<(), StoreError> {
    let fields = [
        ("price", record.price),
        ("realized_vol", record.realized_vol),
        ("garch_variance", record.garch_variance),
        ("garch_forecast", record.garch_forecast),
        ("implied_vol", record.implied_vol),
        ("spread", record.spread),
    ];

    match fields.iter().find(|(_, v)| !v.is_finite()) {
        Some(&(field, _)) => Err(StoreError::NonFinite {
            pair: record.pair.clone(),
            ts_ms: record.timestamp,
            field,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_fields_are_named() {
        let r = VolatilityRecord {
            pair: "X".into(),
            timestamp: 1,
            price: 1.0,
            realized_vol: 0.1,
            garch_variance: f64::NAN,
            garch_forecast: 0.1,
            implied_vol: 0.1,
            spread: 0.01,
        };
        assert_eq!(
            check_finite(&r),
            Err(StoreError::NonFinite {
                pair: "X".into(),
                ts_ms: 1,
                field: "garch_variance"
            })
        );
    }
}
