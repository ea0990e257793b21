use std::collections::BTreeMap;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub row: u64,
    pub col: u64,
}

impl CellId {
    pub fn new(row: u64, col: u64) -> Self {
        Self { row, col }
    }
}

/// Timestamped history per cell, keeping the newest `capacity` entries.
#[derive(Debug)]
pub struct CellHistory {
    capacity: usize,
    cells: Mutex<FxHashMap<CellId, BTreeMap<i64, JsonValue>>>,
}

impl CellHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            cells: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn record(&self, cell: CellId, timestamp: i64, value: JsonValue) {
        let mut cells = self.cells.lock();
        let history = cells.entry(cell).or_default();
        history.insert(timestamp, value);
        while history.len() > self.capacity {
            history.pop_first();
        }
    }

    /// Values recorded strictly after `after`, oldest first.
    pub fn since(&self, cell: CellId, after: Option<i64>) -> Vec<JsonValue> {
        let cells = self.cells.lock();
        let Some(history) = cells.get(&cell) else {
            return Vec::new();
        };
        match after {
            Some(after) => history
                .range(after.saturating_add(1)..)
                .map(|(_, v)| v.clone())
                .collect(),
            None => history.values().cloned().collect(),
        }
    }

    pub fn len(&self, cell: CellId) -> usize {
        self.cells.lock().get(&cell).map_or(0, BTreeMap::len)
    }
}
