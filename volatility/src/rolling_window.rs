use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 20;

/// A timestamped value used inside the rolling window
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedValue {
    pub ts_ms: u64,
    pub value: f64,
}

/// Count-bounded FIFO of log-returns.
///
/// Moments are recomputed from the stored values on each call instead of
/// being kept as running sums: two windows holding the same returns always
/// report bit-identical statistics, which state restoration relies on.
#[derive(Clone, Debug)]
pub struct ReturnWindow {
    /// Returns in arrival order (oldest at the front)
    values: VecDeque<TimedValue>,

    /// Maximum number of returns retained
    capacity: usize,
}

impl Default for ReturnWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ReturnWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Admit a return, evicting the oldest first when the window is full.
    pub fn push(&mut self, ts_ms: u64, value: f64) -> Option<TimedValue> {
        let evicted = if self.values.len() == self.capacity {
            self.values.pop_front()
        } else {
            None
        };

        self.values.push_back(TimedValue { ts_ms, value });
        evicted
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().map(|v| v.value)
    }

    /// Time covered by the window, first to last return.
    pub fn span_ms(&self) -> u64 {
        match (self.values.front(), self.values.back()) {
            (Some(first), Some(last)) => last.ts_ms - first.ts_ms,
            _ => 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().map(|v| v.value)
    }

    /// Population variance `mean(r²) - mean(r)²`, floored at zero.
    pub fn variance(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }

        let n = self.values.len() as f64;
        let (sum, sum_sq) = self
            .iter()
            .fold((0.0, 0.0), |(s, sq), r| (s + r, sq + r * r));

        let mean = sum / n;
        let mean_sq = sum_sq / n;

        // Cancellation can leave a tiny negative residue.
        Some((mean_sq - mean * mean).max(0.0))
    }
}
