//! Full and delta result models published after each cycle.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use viewcalc_common::{TargetRef, Value, ValueSpec};

use crate::cycle::CycleId;

type ConfigValues = BTreeMap<String, BTreeMap<ValueSpec, Value>>;

/// Every materialized output of one cycle, grouped by configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultModel {
    cycle_id: CycleId,
    valuation_time: DateTime<Utc>,
    result_timestamp: DateTime<Utc>,
    values: ConfigValues,
}

impl ResultModel {
    pub fn new(cycle_id: CycleId, valuation_time: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            valuation_time,
            result_timestamp: valuation_time,
            values: ConfigValues::new(),
        }
    }

    pub fn with_result_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.result_timestamp = timestamp;
        self
    }

    pub fn cycle_id(&self) -> CycleId {
        self.cycle_id
    }

    pub fn valuation_time(&self) -> DateTime<Utc> {
        self.valuation_time
    }

    pub fn result_timestamp(&self) -> DateTime<Utc> {
        self.result_timestamp
    }

    pub fn add_value(&mut self, config: &str, spec: ValueSpec, value: Value) {
        insert(&mut self.values, config, spec, value);
    }

    pub fn get(&self, config: &str, spec: &ValueSpec) -> Option<&Value> {
        self.values.get(config).and_then(|m| m.get(spec))
    }

    pub fn configuration_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn values(&self, config: &str) -> impl Iterator<Item = (&ValueSpec, &Value)> {
        self.values.get(config).into_iter().flatten()
    }

    /// `(configuration, spec, value)` for every entry.
    pub fn all_values(&self) -> impl Iterator<Item = (&str, &ValueSpec, &Value)> {
        iter_all(&self.values)
    }

    pub fn targets(&self) -> BTreeSet<&TargetRef> {
        self.all_values().map(|(_, spec, _)| spec.target()).collect()
    }

    pub fn target_result(&self, target: &TargetRef) -> TargetResult<'_> {
        TargetResult::collect(self.all_values(), target)
    }

    /// Every target's values in one pass, ordered by target.
    pub fn by_target(&self) -> Vec<TargetResult<'_>> {
        TargetResult::group(self.all_values())
    }

    pub fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overlay `newer` onto `self`. Newer values win; entries `newer` lacks
    /// are kept; cycle identity and timestamps become `newer`'s.
    pub fn merge_from(&mut self, newer: &ResultModel) {
        self.cycle_id = newer.cycle_id;
        self.valuation_time = newer.valuation_time;
        self.result_timestamp = newer.result_timestamp;
        for (config, spec, value) in newer.all_values() {
            insert(&mut self.values, config, spec.clone(), value.clone());
        }
    }
}

/// Entries that differ from the previous cycle's model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaResultModel {
    cycle_id: CycleId,
    previous_cycle_id: Option<CycleId>,
    result_timestamp: DateTime<Utc>,
    values: ConfigValues,
}

impl DeltaResultModel {
    /// Entries of `current` that are new or changed relative to `previous`.
    /// With no previous model every entry is part of the delta.
    pub fn between(previous: Option<&ResultModel>, current: &ResultModel) -> Self {
        let mut values = ConfigValues::new();
        for (config, spec, value) in current.all_values() {
            let unchanged = previous
                .and_then(|p| p.get(config, spec))
                .is_some_and(|prev| prev == value);
            if !unchanged {
                insert(&mut values, config, spec.clone(), value.clone());
            }
        }
        Self {
            cycle_id: current.cycle_id,
            previous_cycle_id: previous.map(ResultModel::cycle_id),
            result_timestamp: current.result_timestamp,
            values,
        }
    }

    pub fn cycle_id(&self) -> CycleId {
        self.cycle_id
    }

    pub fn previous_cycle_id(&self) -> Option<CycleId> {
        self.previous_cycle_id
    }

    pub fn result_timestamp(&self) -> DateTime<Utc> {
        self.result_timestamp
    }

    pub fn get(&self, config: &str, spec: &ValueSpec) -> Option<&Value> {
        self.values.get(config).and_then(|m| m.get(spec))
    }

    pub fn all_values(&self) -> impl Iterator<Item = (&str, &ValueSpec, &Value)> {
        iter_all(&self.values)
    }

    pub fn targets(&self) -> BTreeSet<&TargetRef> {
        self.all_values().map(|(_, spec, _)| spec.target()).collect()
    }

    pub fn target_result(&self, target: &TargetRef) -> TargetResult<'_> {
        TargetResult::collect(self.all_values(), target)
    }

    /// Every target's values in one pass, ordered by target.
    pub fn by_target(&self) -> Vec<TargetResult<'_>> {
        TargetResult::group(self.all_values())
    }

    pub fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Union of two consecutive deltas: later values win, the earlier
    /// delta's baseline is kept.
    pub fn merge_from(&mut self, newer: &DeltaResultModel) {
        self.cycle_id = newer.cycle_id;
        self.result_timestamp = newer.result_timestamp;
        if self.previous_cycle_id.is_none() && self.values.is_empty() {
            self.previous_cycle_id = newer.previous_cycle_id;
        }
        for (config, spec, value) in newer.all_values() {
            insert(&mut self.values, config, spec.clone(), value.clone());
        }
    }
}

/// All values for one target, across configurations.
#[derive(Debug)]
pub struct TargetResult<'a> {
    target: TargetRef,
    entries: Vec<(&'a str, &'a ValueSpec, &'a Value)>,
}

impl<'a> TargetResult<'a> {
    fn collect(
        all: impl Iterator<Item = (&'a str, &'a ValueSpec, &'a Value)>,
        target: &TargetRef,
    ) -> Self {
        Self {
            target: target.clone(),
            entries: all.filter(|(_, spec, _)| spec.target() == target).collect(),
        }
    }

    fn group(all: impl Iterator<Item = (&'a str, &'a ValueSpec, &'a Value)>) -> Vec<Self> {
        let mut grouped: BTreeMap<&'a TargetRef, Vec<(&'a str, &'a ValueSpec, &'a Value)>> =
            BTreeMap::new();
        for entry in all {
            grouped.entry(entry.1.target()).or_default().push(entry);
        }
        grouped
            .into_iter()
            .map(|(target, entries)| Self {
                target: target.clone(),
                entries,
            })
            .collect()
    }

    pub fn target(&self) -> &TargetRef {
        &self.target
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a ValueSpec, &'a Value)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn insert(values: &mut ConfigValues, config: &str, spec: ValueSpec, value: Value) {
    match values.get_mut(config) {
        Some(m) => {
            m.insert(spec, value);
        }
        None => {
            values.insert(config.to_string(), BTreeMap::from([(spec, value)]));
        }
    }
}

fn iter_all(values: &ConfigValues) -> impl Iterator<Item = (&str, &ValueSpec, &Value)> {
    values
        .iter()
        .flat_map(|(config, m)| m.iter().map(move |(s, v)| (config.as_str(), s, v)))
}
