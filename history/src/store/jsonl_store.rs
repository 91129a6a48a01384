//! JsonlStore
//! ----------
//! One append-only JSON Lines file per pair under a data directory:
//!
//! ```text
//! <data_dir>/<encoded pair>.jsonl
//! ```
//!
//! Each line is one complete `VolatilityRecord`. A record is committed with a
//! single `write_all` of the full line followed by `sync_data`; only then does
//! the committed length move forward. A failed write is truncated back to the
//! previous length and its file handle discarded.
//!
//! Only the most recent records of each pair stay in memory (the tail cache).
//! Longer reads stream the committed prefix of the file.
//!
//! Logs are loaded lazily on first access. A trailing line without a newline
//! (crash mid-write) is cut off on load; any other unparsable line fails the
//! load.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{debug, error, info, instrument, warn};

use volatility::VolatilityRecord;

use super::{AppendOutcome, StoreError, VolatilityStore, check_finite};

const EXTENSION: &str = "jsonl";

/// Records kept in memory per pair.
pub const DEFAULT_TAIL_CAPACITY: usize = 1024;

pub struct JsonlStore {
    dir: PathBuf,
    tail_capacity: usize,
    /// Lookup only; never held across I/O.
    logs: Mutex<HashMap<String, Arc<PairLog>>>,
}

struct PairLog {
    pair: String,
    path: PathBuf,
    loaded: OnceCell<LoadedLog>,
}

struct LoadedLog {
    /// Serializes appends. Opened on first append so reads never create files.
    writer: AsyncMutex<Option<File>>,
    committed: RwLock<Committed>,
}

/// What readers may see. Published only after a successful sync.
struct Committed {
    /// Byte length of the committed prefix.
    len: u64,
    count: usize,
    /// Most recent records, ascending.
    tail: VecDeque<VolatilityRecord>,
}

impl Committed {
    fn latest(&self) -> Option<&VolatilityRecord> {
        self.tail.back()
    }

    /// Whether `ts_ms` is committed, or `None` if it predates the cache.
    fn contains(&self, ts_ms: u64) -> Option<bool> {
        match self.tail.front() {
            Some(first) if first.timestamp <= ts_ms => Some(
                self.tail
                    .binary_search_by_key(&ts_ms, |r| r.timestamp)
                    .is_ok(),
            ),
            _ if self.count == self.tail.len() => Some(false),
            _ => None,
        }
    }

    /// The most recent `want` records, if all of them are cached.
    fn cached(&self, want: usize) -> Option<Vec<VolatilityRecord>> {
        (want <= self.tail.len())
            .then(|| self.tail.iter().skip(self.tail.len() - want).cloned().collect())
    }
}

fn push_bounded(buf: &mut VecDeque<VolatilityRecord>, capacity: usize, record: VolatilityRecord) {
    if buf.len() == capacity {
        buf.pop_front();
    }
    buf.push_back(record);
}

impl JsonlStore {
    /// Open (creating if needed) a log directory.
    pub async fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create data dir {}", dir.display()))?;

        info!(dir = %dir.display(), "jsonl store opened");

        Ok(Self {
            dir,
            tail_capacity: DEFAULT_TAIL_CAPACITY,
            logs: Mutex::new(HashMap::new()),
        })
    }

    /// Number of recent records cached per pair (at least one).
    pub fn with_tail_capacity(mut self, capacity: usize) -> Self {
        self.tail_capacity = capacity.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `pair`.
    pub fn path_for(&self, pair: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", encode_pair(pair)))
    }

    fn log(&self, pair: &str) -> Arc<PairLog> {
        let mut logs = self.logs.lock();
        logs.entry(pair.to_string())
            .or_insert_with(|| {
                Arc::new(PairLog {
                    pair: pair.to_string(),
                    path: self.path_for(pair),
                    loaded: OnceCell::new(),
                })
            })
            .clone()
    }

    /// Forget a pair so the next access reloads (and repairs) its file.
    fn evict(&self, pair: &str) {
        self.logs.lock().remove(pair);
    }

    /// Record count of an already loaded log.
    fn loaded_count(&self, pair: &str) -> Option<usize> {
        let logs = self.logs.lock();
        let loaded = logs.get(pair)?.loaded.get()?;
        let count = loaded.committed.read().count;
        Some(count)
    }
}

impl PairLog {
    async fn loaded(&self, tail_capacity: usize) -> anyhow::Result<&LoadedLog> {
        self.loaded
            .get_or_try_init(|| load(&self.pair, &self.path, tail_capacity))
            .await
    }
}

async fn load(pair: &str, path: &Path, tail_capacity: usize) -> anyhow::Result<LoadedLog> {
    let mut tail = VecDeque::new();
    let scanned = scan(pair, path, None, |r| push_bounded(&mut tail, tail_capacity, r)).await?;

    if scanned.torn > 0 {
        warn!(
            pair,
            path = %path.display(),
            dropped_bytes = scanned.torn,
            "truncating torn tail of history log"
        );
        truncate(path, scanned.len)
            .await
            .with_context(|| format!("failed to repair {}", path.display()))?;
    }

    debug!(pair, records = scanned.count, cached = tail.len(), "history log loaded");

    Ok(LoadedLog {
        writer: AsyncMutex::new(None),
        committed: RwLock::new(Committed {
            len: scanned.len,
            count: scanned.count,
            tail,
        }),
    })
}

#[derive(Debug, Default)]
struct Scanned {
    /// Bytes of complete lines.
    len: u64,
    count: usize,
    /// Bytes of a trailing line with no newline.
    torn: u64,
}

/// Stream the complete lines of a log (at most `limit` bytes), validating
/// each and handing records to `visit` in order. A missing file is empty.
async fn scan(
    pair: &str,
    path: &Path,
    limit: Option<u64>,
    mut visit: impl FnMut(VolatilityRecord),
) -> anyhow::Result<Scanned> {
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Scanned::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let corrupt = |line: usize, reason: String| StoreError::Corrupt {
        location: path.display().to_string(),
        line,
        reason,
    };

    let mut reader = BufReader::new(file.take(limit.unwrap_or(u64::MAX)));
    let mut buf = Vec::new();
    let mut scanned = Scanned::default();
    let mut prev_ts: Option<u64> = None;
    let mut line = 0;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') {
            scanned.torn = n as u64;
            break;
        }
        scanned.len += n as u64;
        line += 1;

        let raw = &buf[..n - 1];
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let record: VolatilityRecord =
            serde_json::from_slice(raw).map_err(|e| corrupt(line, e.to_string()))?;

        if record.pair != pair {
            return Err(corrupt(line, format!("foreign pair {:?}", record.pair)).into());
        }
        if let Some(prev) = prev_ts
            && record.timestamp <= prev
        {
            return Err(corrupt(
                line,
                format!("timestamp {} not after {}", record.timestamp, prev),
            )
            .into());
        }

        prev_ts = Some(record.timestamp);
        scanned.count += 1;
        visit(record);
    }

    Ok(scanned)
}

/// Whether a log file holds at least one complete, non-blank line.
async fn has_complete_line(path: &Path) -> anyhow::Result<bool> {
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 || buf.last() != Some(&b'\n') {
            return Ok(false);
        }
        if !buf.iter().all(u8::is_ascii_whitespace) {
            return Ok(true);
        }
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

async fn truncate(path: &Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path).await?;
    file.set_len(len).await?;
    file.sync_data().await
}

#[async_trait]
impl VolatilityStore for JsonlStore {
    #[instrument(skip(self, record), target = "history", fields(pair = %record.pair, ts_ms = record.timestamp))]
    async fn append(&self, record: &VolatilityRecord) -> anyhow::Result<AppendOutcome> {
        check_finite(record)?;

        let log = self.log(&record.pair);
        let loaded = log.loaded(self.tail_capacity).await?;
        let mut writer = loaded.writer.lock().await;

        let (committed_len, latest_ts, known) = {
            let committed = loaded.committed.read();
            (
                committed.len,
                committed.latest().map(|r| r.timestamp),
                committed.contains(record.timestamp),
            )
        };

        if let Some(latest_ts) = latest_ts
            && record.timestamp <= latest_ts
        {
            let exists = match known {
                Some(found) => found,
                None => {
                    let mut found = false;
                    scan(&log.pair, &log.path, Some(committed_len), |r| {
                        found |= r.timestamp == record.timestamp;
                    })
                    .await?;
                    found
                }
            };
            if exists {
                return Ok(AppendOutcome::Duplicate);
            }
            return Err(StoreError::OutOfOrder {
                pair: record.pair.clone(),
                ts_ms: record.timestamp,
                latest_ts_ms: latest_ts,
            }
            .into());
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let file = match writer.take() {
            Some(f) => f,
            None => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log.path)
                .await
                .with_context(|| format!("failed to open {}", log.path.display()))?,
        };
        let file = writer.insert(file);

        if let Err(e) = write_line(file, &line).await {
            *writer = None;
            if let Err(rollback) = truncate(&log.path, committed_len).await {
                error!(
                    error = %rollback,
                    path = %log.path.display(),
                    "failed to roll back partial write; log will be repaired on reload"
                );
                drop(writer);
                self.evict(&record.pair);
            }
            return Err(e).with_context(|| format!("failed to append to {}", log.path.display()));
        }

        let mut committed = loaded.committed.write();
        committed.len += line.len() as u64;
        committed.count += 1;
        push_bounded(&mut committed.tail, self.tail_capacity, record.clone());

        Ok(AppendOutcome::Committed)
    }

    async fn read_latest(&self, pair: &str) -> anyhow::Result<Option<VolatilityRecord>> {
        let log = self.log(pair);
        let loaded = log.loaded(self.tail_capacity).await?;
        Ok(loaded.committed.read().latest().cloned())
    }

    async fn read_history(
        &self,
        pair: &str,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<VolatilityRecord>> {
        let log = self.log(pair);
        let loaded = log.loaded(self.tail_capacity).await?;

        let (len, want) = {
            let committed = loaded.committed.read();
            let want = limit.map_or(committed.count, |k| k.min(committed.count));
            if let Some(records) = committed.cached(want) {
                return Ok(records);
            }
            (committed.len, want)
        };

        let mut out = VecDeque::with_capacity(want);
        scan(pair, &log.path, Some(len), |r| push_bounded(&mut out, want, r)).await?;
        Ok(out.into())
    }

    async fn pairs(&self) -> anyhow::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to list {}", self.dir.display()))?;

        let mut pairs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(pair) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_pair)
            else {
                warn!(path = %path.display(), "ignoring file with undecodable pair name");
                continue;
            };

            let listed = match self.loaded_count(&pair) {
                Some(count) => count > 0,
                None => has_complete_line(&path).await?,
            };
            if listed {
                pairs.push(pair);
            }
        }

        pairs.sort();
        Ok(pairs)
    }
}

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-')
}

/// Pair id to file stem: `[A-Za-z0-9._-]` kept, every other byte as `%XX`.
pub fn encode_pair(pair: &str) -> String {
    let mut out = String::with_capacity(pair.len());
    for &b in pair.as_bytes() {
        if is_plain(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Inverse of [`encode_pair`]. `None` for stems it could not have produced.
pub fn decode_pair(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = std::str::from_utf8(bytes.get(i + 1..i + 3)?).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if is_plain(b) => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }

    String::from_utf8(out).ok()
}
