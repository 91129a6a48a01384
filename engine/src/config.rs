use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use history::VolatilityStore;
use history::store::jsonl_store::JsonlStore;
use history::store::sqlite_store::SqliteStore;
use volatility::ModelConfig;

/// Which `VolatilityStore` backs the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// One JSON Lines file per pair under `data_dir`.
    Jsonl,
    /// A single SQLite database at `database_url`.
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jsonl" => Ok(Self::Jsonl),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(anyhow::anyhow!("unknown store backend '{other}'")),
        }
    }
}

/// Per-worker tuning shared by every pair.
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    /// Capacity of each pair's command channel.
    ///
    /// Acts as backpressure: a burst for one pair blocks its callers without
    /// affecting other pairs.
    pub queue_capacity: usize,

    /// Records a pair may hold uncommitted before new ticks are refused.
    pub max_pending_records: usize,

    /// Storage calls slower than this are logged on the `performance` target.
    pub slow_io_budget: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_pending_records: 1024,
            slow_io_budget: Duration::from_millis(250),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub store: StoreBackend,

    /// Directory holding the per-pair JSONL logs.
    pub data_dir: PathBuf,

    /// SQLite connection string, used with `StoreBackend::Sqlite`.
    pub database_url: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    pub model: ModelConfig,

    pub worker: WorkerSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Jsonl,
            data_dir: PathBuf::from("./data"),
            database_url: "sqlite://volatility.db".to_string(),
            json_logs: false,
            model: ModelConfig::default(),
            worker: WorkerSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `VOLATILITY_DATA_DIR`, `VOLATILITY_STORE`,
    /// `DATABASE_URL` and `APP_ENV=production`.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let store = match std::env::var("VOLATILITY_STORE") {
            Ok(s) => s.parse()?,
            Err(_) => defaults.store,
        };

        let data_dir = std::env::var("VOLATILITY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);

        let json_logs = std::env::var("APP_ENV").unwrap_or_default() == "production";

        Ok(Self {
            store,
            data_dir,
            database_url,
            json_logs,
            ..defaults
        })
    }

    /// Open the configured backend.
    pub async fn open_store(&self) -> anyhow::Result<Arc<dyn VolatilityStore>> {
        Ok(match self.store {
            StoreBackend::Jsonl => Arc::new(JsonlStore::open(&self.data_dir).await?),
            StoreBackend::Sqlite => Arc::new(SqliteStore::new(&self.database_url).await?),
        })
    }
}
