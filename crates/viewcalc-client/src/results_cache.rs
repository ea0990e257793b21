//! Latest value, change flag and bounded history per result, fed by
//! successive full result models.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use viewcalc_common::{Value, ValueKind, ValueSpec};
use viewcalc_engine::ResultModel;

/// What a reader sees for one `(configuration, spec)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    /// `None` until a real value has been observed.
    pub value: Option<Value>,
    pub history: Option<Vec<Value>>,
    /// Whether the most recent model changed this entry.
    pub updated: bool,
}

#[derive(Debug)]
struct Entry {
    value: Option<Value>,
    history: Option<VecDeque<Value>>,
    changed_at: u64,
}

#[derive(Debug)]
pub struct ResultsCache {
    history_size: usize,
    generation: u64,
    entries: FxHashMap<String, FxHashMap<ValueSpec, Entry>>,
}

impl ResultsCache {
    pub fn new(history_size: usize) -> Self {
        Self {
            history_size: history_size.max(1),
            generation: 0,
            entries: FxHashMap::default(),
        }
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    /// Ingest every value of `model`. Entries the model lacks keep their value
    /// and read as not updated.
    pub fn put(&mut self, model: &ResultModel) {
        self.generation += 1;
        let generation = self.generation;
        let history_size = self.history_size;

        for (config, spec, value) in model.all_values() {
            let by_spec = self.entries.entry(config.to_string()).or_default();
            match by_spec.get_mut(spec) {
                None => {
                    let history = value
                        .kind()
                        .keeps_history()
                        .then(|| VecDeque::from([value.clone()]));
                    let value = (!value.is_not_calculated()).then(|| value.clone());
                    by_spec.insert(
                        spec.clone(),
                        Entry {
                            value,
                            history,
                            changed_at: generation,
                        },
                    );
                }
                Some(entry) => entry.observe(value, generation, history_size),
            }
        }
    }

    /// `expected` decides whether a missing history reads as empty (history
    /// kinds) or absent (everything else).
    pub fn get_result(
        &self,
        config: &str,
        spec: &ValueSpec,
        expected: Option<ValueKind>,
    ) -> CachedResult {
        let wants_history = expected.is_some_and(ValueKind::keeps_history);
        let Some(entry) = self.entries.get(config).and_then(|m| m.get(spec)) else {
            return CachedResult {
                value: None,
                history: wants_history.then(Vec::new),
                updated: false,
            };
        };
        let history = match &entry.history {
            Some(history) => Some(history.iter().cloned().collect()),
            None => wants_history.then(Vec::new),
        };
        CachedResult {
            value: entry.value.clone(),
            history,
            updated: entry.changed_at == self.generation,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(FxHashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ResultsCache {
    fn default() -> Self {
        Self::new(20)
    }
}

impl Entry {
    fn observe(&mut self, value: &Value, generation: u64, history_size: usize) {
        let unchanged = match &self.value {
            Some(current) => current == value,
            // A sentinel seen before any real value keeps reading as "no value yet".
            None => value.is_not_calculated(),
        };
        if unchanged {
            return;
        }

        self.value = Some(value.clone());
        self.changed_at = generation;
        match &mut self.history {
            Some(history) => {
                history.push_back(value.clone());
                while history.len() > history_size {
                    history.pop_front();
                }
            }
            None if value.kind().keeps_history() => {
                self.history = Some(VecDeque::from([value.clone()]));
            }
            None => {}
        }
    }
}
