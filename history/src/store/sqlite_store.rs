//! SqliteStore
//! -----------
//! SQLite-backed `VolatilityStore`. All pairs share one table keyed by
//! `(pair, ts_ms)`:
//!
//!  - the primary key gives `(pair, timestamp)` de-duplication
//!  - a single guarded `INSERT ... SELECT` refuses timestamps older than the
//!    pair's latest row, so each append is one atomic statement
//!  - `REAL` columns hold the `f64` fields bit-for-bit
use std::str::FromStr;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{info, instrument};

use volatility::VolatilityRecord;

use super::{AppendOutcome, StoreError, VolatilityStore, check_finite};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (creating the database file if missing) and ensure the
    /// schema exists.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid sqlite url {url}"))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("failed to connect to {url}"))?;

        info!(url, "sqlite store opened");
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS volatility_records (
                pair TEXT NOT NULL,
                ts_ms INTEGER NOT NULL,

                price REAL NOT NULL,
                realized_vol REAL NOT NULL,
                garch_variance REAL NOT NULL,
                garch_forecast REAL NOT NULL,
                implied_vol REAL NOT NULL,
                spread REAL NOT NULL,

                PRIMARY KEY (pair, ts_ms)
            );
        "#,
        )
        .execute(&pool)
        .await
        .context("failed to create volatility_records")?;

        Ok(Self { pool })
    }

    async fn latest_ts(&self, pair: &str) -> anyhow::Result<Option<u64>> {
        let ts: Option<i64> =
            sqlx::query_scalar("SELECT MAX(ts_ms) FROM volatility_records WHERE pair = ?")
                .bind(pair)
                .fetch_one(&self.pool)
                .await?;
        ts.map(i64_to_u64).transpose()
    }
}

const COLUMNS: &str =
    "pair, ts_ms, price, realized_vol, garch_variance, garch_forecast, implied_vol, spread";

#[async_trait]
impl VolatilityStore for SqliteStore {
    /// Insert unless the pair already has this or a later timestamp.
    ///
    /// Rows affected tells committed from refused; a refusal is then
    /// classified by looking for the exact key. The pair's worker is its only
    /// writer, so nothing can slip in between the two statements.
    #[instrument(skip(self, record), target = "history", fields(pair = %record.pair, ts_ms = record.timestamp))]
    async fn append(&self, record: &VolatilityRecord) -> anyhow::Result<AppendOutcome> {
        check_finite(record)?;
        let ts = u64_to_i64(record.timestamp)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO volatility_records (
                pair, ts_ms, price, realized_vol,
                garch_variance, garch_forecast, implied_vol, spread
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
            WHERE NOT EXISTS (
                SELECT 1 FROM volatility_records WHERE pair = ?1 AND ts_ms > ?2
            )
            ON CONFLICT(pair, ts_ms) DO NOTHING;
        "#,
        )
        .bind(&record.pair)
        .bind(ts)
        .bind(record.price)
        .bind(record.realized_vol)
        .bind(record.garch_variance)
        .bind(record.garch_forecast)
        .bind(record.implied_vol)
        .bind(record.spread)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(AppendOutcome::Committed);
        }

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM volatility_records WHERE pair = ? AND ts_ms = ?")
                .bind(&record.pair)
                .bind(ts)
                .fetch_optional(&self.pool)
                .await?;

        if exists.is_some() {
            return Ok(AppendOutcome::Duplicate);
        }

        let latest_ts_ms = self
            .latest_ts(&record.pair)
            .await?
            .ok_or_else(|| anyhow!("insert refused for {} with no existing rows", record.pair))?;

        Err(StoreError::OutOfOrder {
            pair: record.pair.clone(),
            ts_ms: record.timestamp,
            latest_ts_ms,
        }
        .into())
    }

    async fn read_latest(&self, pair: &str) -> anyhow::Result<Option<VolatilityRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM volatility_records WHERE pair = ? ORDER BY ts_ms DESC LIMIT 1"
        ))
        .bind(pair)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn read_history(
        &self,
        pair: &str,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<VolatilityRecord>> {
        // LIMIT -1 is unbounded in SQLite.
        let limit = match limit {
            Some(k) => i64::try_from(k).unwrap_or(i64::MAX),
            None => -1,
        };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM (
                SELECT {COLUMNS} FROM volatility_records
                WHERE pair = ?
                ORDER BY ts_ms DESC
                LIMIT ?
            )
            ORDER BY ts_ms ASC
        "#
        ))
        .bind(pair)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn pairs(&self) -> anyhow::Result<Vec<String>> {
        let pairs: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT pair FROM volatility_records ORDER BY pair")
                .fetch_all(&self.pool)
                .await?;
        Ok(pairs)
    }
}

fn row_to_record(r: &SqliteRow) -> anyhow::Result<VolatilityRecord> {
    Ok(VolatilityRecord {
        pair: r.try_get("pair")?,
        timestamp: i64_to_u64(r.try_get("ts_ms")?)?,
        price: r.try_get("price")?,
        realized_vol: r.try_get("realized_vol")?,
        garch_variance: r.try_get("garch_variance")?,
        garch_forecast: r.try_get("garch_forecast")?,
        implied_vol: r.try_get("implied_vol")?,
        spread: r.try_get("spread")?,
    })
}

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        return Err(anyhow!("u64 too large for i64: {v}"));
    }
    Ok(v as i64)
}
