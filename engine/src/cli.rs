use std::path::PathBuf;

use clap::{Parser, Subcommand};
use engine::{EngineConfig, StoreBackend};

#[derive(Debug, Parser)]
#[clap(name = "volatility-engine", version)]
pub struct Cli {
    /// Storage backend (overrides VOLATILITY_STORE)
    #[clap(long, value_enum)]
    pub store: Option<StoreBackend>,

    /// Directory for per-pair JSONL logs (overrides VOLATILITY_DATA_DIR)
    #[clap(long)]
    pub data_dir: Option<PathBuf>,

    /// SQLite connection string (overrides DATABASE_URL)
    #[clap(long)]
    pub database_url: Option<String>,

    /// Emit logs as JSON lines
    #[clap(long)]
    pub json_logs: bool,

    /// Number of returns in the realized-volatility window
    #[clap(long)]
    pub window_len: Option<usize>,

    /// GARCH omega
    #[clap(long)]
    pub omega: Option<f64>,

    /// GARCH alpha
    #[clap(long)]
    pub alpha: Option<f64>,

    /// GARCH beta
    #[clap(long)]
    pub beta: Option<f64>,

    /// Initial variance for pairs without history (default: long-run variance)
    #[clap(long)]
    pub seed_variance: Option<f64>,

    /// Uncommitted records a pair may hold before ticks are refused
    #[clap(long)]
    pub max_pending_records: Option<usize>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read `PAIR PRICE [TS_MS]` lines from stdin, print records as JSON (default)
    Ingest,
    /// Latest record for a pair
    Latest { pair: String },
    /// Persisted records for a pair, oldest first
    History {
        pair: String,
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Multi-horizon variance forecast from the latest record
    Term {
        pair: String,
        #[clap(long, value_delimiter = ',', default_values_t = [1u32, 5, 20])]
        horizons: Vec<u32>,
    },
    /// Volatility regime of the latest record
    Regime { pair: String },
    /// Pairs with persisted history
    Pairs,
}

impl Cli {
    /// Flags win over the environment.
    pub fn apply(&self, cfg: &mut EngineConfig) {
        if let Some(store) = self.store {
            cfg.store = store;
        }
        if let Some(dir) = &self.data_dir {
            cfg.data_dir = dir.clone();
        }
        if let Some(url) = &self.database_url {
            cfg.database_url = url.clone();
        }
        cfg.json_logs |= self.json_logs;

        let model = &mut cfg.model;
        if let Some(n) = self.window_len {
            model.window_len = n;
        }
        if let Some(omega) = self.omega {
            model.garch.omega = omega;
        }
        if let Some(alpha) = self.alpha {
            model.garch.alpha = alpha;
        }
        if let Some(beta) = self.beta {
            model.garch.beta = beta;
        }
        if self.seed_variance.is_some() {
            model.seed_variance = self.seed_variance;
        }
        if let Some(max) = self.max_pending_records {
            cfg.worker.max_pending_records = max;
        }
    }
}

/// One parsed input line.
#[derive(Debug, PartialEq)]
pub struct TickLine {
    pub pair: String,
    pub price: f64,
    pub ts_ms: Option<u64>,
}

/// Parse `PAIR PRICE [TS_MS]`. Blank lines and `#` comments yield `None`.
pub fn parse_tick_line(line: &str) -> Result<Option<TickLine>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let (Some(pair), Some(price)) = (parts.next(), parts.next()) else {
        return Err(format!("expected `PAIR PRICE [TS_MS]`, got {line:?}"));
    };

    let price = price
        .parse::<f64>()
        .map_err(|e| format!("bad price {price:?}: {e}"))?;

    let ts_ms = parts
        .next()
        .map(|ts| ts.parse::<u64>().map_err(|e| format!("bad timestamp {ts:?}: {e}")))
        .transpose()?;

    if parts.next().is_some() {
        return Err(format!("trailing fields in {line:?}"));
    }

    Ok(Some(TickLine {
        pair: pair.to_string(),
        price,
        ts_ms,
    }))
}
