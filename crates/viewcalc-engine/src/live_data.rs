use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use viewcalc_common::{Value, ValueRequirement};

/// Source of market data and other externally sourced inputs.
pub trait LiveDataProvider: Send + Sync {
    fn subscribe(&self, requirements: &[ValueRequirement]);

    fn unsubscribe(&self, requirements: &[ValueRequirement]);

    /// Point-in-time view of every available input.
    fn snapshot(&self) -> LiveDataSnapshot;
}

/// Inputs frozen at the start of one cycle.
#[derive(Debug, Clone, Default)]
pub struct LiveDataSnapshot {
    snapshot_time: DateTime<Utc>,
    values: FxHashMap<ValueRequirement, Value>,
}

impl LiveDataSnapshot {
    pub fn new(snapshot_time: DateTime<Utc>, values: FxHashMap<ValueRequirement, Value>) -> Self {
        Self {
            snapshot_time,
            values,
        }
    }

    pub fn snapshot_time(&self) -> DateTime<Utc> {
        self.snapshot_time
    }

    pub fn get(&self, requirement: &ValueRequirement) -> Option<&Value> {
        self.values.get(requirement)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Provider backed by an in-process map; values are set directly.
#[derive(Debug, Default)]
pub struct InMemoryLiveData {
    values: RwLock<FxHashMap<ValueRequirement, Value>>,
    subscriptions: Mutex<FxHashSet<ValueRequirement>>,
    subscribe_calls: AtomicUsize,
}

impl InMemoryLiveData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&self, requirement: ValueRequirement, value: impl Into<Value>) {
        self.values.write().insert(requirement, value.into());
    }

    pub fn remove_value(&self, requirement: &ValueRequirement) -> Option<Value> {
        self.values.write().remove(requirement)
    }

    pub fn subscriptions(&self) -> FxHashSet<ValueRequirement> {
        self.subscriptions.lock().clone()
    }

    pub fn is_subscribed(&self, requirement: &ValueRequirement) -> bool {
        self.subscriptions.lock().contains(requirement)
    }

    /// Number of non-empty `subscribe` calls received.
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::Relaxed)
    }
}

impl LiveDataProvider for InMemoryLiveData {
    fn subscribe(&self, requirements: &[ValueRequirement]) {
        if requirements.is_empty() {
            return;
        }
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        self.subscriptions
            .lock()
            .extend(requirements.iter().cloned());
    }

    fn unsubscribe(&self, requirements: &[ValueRequirement]) {
        let mut subs = self.subscriptions.lock();
        for r in requirements {
            subs.remove(r);
        }
    }

    fn snapshot(&self) -> LiveDataSnapshot {
        LiveDataSnapshot::new(Utc::now(), self.values.read().clone())
    }
}
