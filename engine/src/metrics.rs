use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Minimal counters for operational visibility.
#[derive(Clone, Debug, Default)]
pub struct Counters {
    pub ticks_accepted: Arc<AtomicU64>,
    pub ticks_rejected: Arc<AtomicU64>,

    pub records_emitted: Arc<AtomicU64>,
    pub records_committed: Arc<AtomicU64>,
    pub duplicate_appends: Arc<AtomicU64>,

    // soft faults
    pub ceiling_hits: Arc<AtomicU64>,
    pub persistence_failures: Arc<AtomicU64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub ticks_accepted: u64,
    pub ticks_rejected: u64,
    pub records_emitted: u64,
    pub records_committed: u64,
    pub duplicate_appends: u64,
    pub ceiling_hits: u64,
    pub persistence_failures: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            ticks_accepted: get(&self.ticks_accepted),
            ticks_rejected: get(&self.ticks_rejected),
            records_emitted: get(&self.records_emitted),
            records_committed: get(&self.records_committed),
            duplicate_appends: get(&self.duplicate_appends),
            ceiling_hits: get(&self.ceiling_hits),
            persistence_failures: get(&self.persistence_failures),
        }
    }
}
