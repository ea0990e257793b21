//! Per-cycle computation cache.
//!
//! A [`CacheWriter`] is filled while a cycle evaluates and then frozen into a
//! read-only [`ComputationCache`] owned by the published cycle. Values are
//! keyed by configuration name and then by exact [`ValueSpec`].

use std::sync::Arc;

use rustc_hash::FxHashMap;
use viewcalc_common::{Value, ValueSpec};

type ConfigValues = FxHashMap<ValueSpec, Value>;

#[derive(Debug, Default)]
pub struct CacheWriter {
    configs: FxHashMap<Arc<str>, ConfigValues>,
}

impl CacheWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value. A later put for the same key replaces the earlier one.
    pub fn put(&mut self, config: &str, spec: ValueSpec, value: Value) {
        match self.configs.get_mut(config) {
            Some(values) => {
                values.insert(spec, value);
            }
            None => {
                let mut values = ConfigValues::default();
                values.insert(spec, value);
                self.configs.insert(Arc::from(config), values);
            }
        }
    }

    pub fn get(&self, config: &str, spec: &ValueSpec) -> Option<&Value> {
        self.configs.get(config).and_then(|values| values.get(spec))
    }

    pub fn len(&self) -> usize {
        self.configs.values().map(FxHashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn freeze(self) -> ComputationCache {
        ComputationCache {
            configs: self.configs,
        }
    }
}

#[derive(Debug, Default)]
pub struct ComputationCache {
    configs: FxHashMap<Arc<str>, ConfigValues>,
}

impl ComputationCache {
    /// `None` means the value was never materialized; failures are stored as
    /// not-calculated sentinels instead.
    pub fn get(&self, config: &str, spec: &ValueSpec) -> Option<&Value> {
        self.configs.get(config).and_then(|values| values.get(spec))
    }

    /// Values present for `specs`; absent keys are left out.
    pub fn get_all<'a>(
        &self,
        config: &str,
        specs: impl IntoIterator<Item = &'a ValueSpec>,
    ) -> FxHashMap<ValueSpec, Value> {
        let Some(values) = self.configs.get(config) else {
            return FxHashMap::default();
        };
        specs
            .into_iter()
            .filter_map(|spec| values.get(spec).map(|v| (spec.clone(), v.clone())))
            .collect()
    }

    pub fn configuration_names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(|k| k.as_ref())
    }

    pub fn len(&self) -> usize {
        self.configs.values().map(FxHashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
