use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use thiserror::Error;

use crate::cycle::{CycleId, ViewCycle};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    #[error("{0} is not retained")]
    CycleNotRetained(CycleId),

    #[error("no cycle is available")]
    NoCycleAvailable,
}

struct RetainedCycle {
    cycle: Arc<ViewCycle>,
    leases: AtomicUsize,
    discard_requested: AtomicBool,
}

/// Reference counting over completed cycles.
///
/// A cycle stays retained while it holds outstanding leases. `discard` only
/// marks the cycle; it is dropped from the table once the last lease is
/// released. Leases keep their own handle to the cycle so queries stay valid
/// even after the table entry is gone.
#[derive(Default)]
pub struct CycleLeaseManager {
    cycles: DashMap<CycleId, RetainedCycle>,
}

impl CycleLeaseManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `cycle` available for leasing.
    pub fn retain(&self, cycle: Arc<ViewCycle>) {
        let id = cycle.id();
        self.cycles.entry(id).or_insert_with(|| RetainedCycle {
            cycle,
            leases: AtomicUsize::new(0),
            discard_requested: AtomicBool::new(false),
        });
        tracing::trace!(cycle = id.0, "cycle retained");
    }

    pub fn acquire(self: &Arc<Self>, id: CycleId) -> Result<CycleLease, LeaseError> {
        let entry = self
            .cycles
            .get(&id)
            .ok_or(LeaseError::CycleNotRetained(id))?;
        if entry.discard_requested.load(Ordering::Acquire) {
            return Err(LeaseError::CycleNotRetained(id));
        }
        entry.leases.fetch_add(1, Ordering::AcqRel);
        Ok(CycleLease {
            manager: Arc::clone(self),
            cycle: entry.cycle.clone(),
        })
    }

    /// Request removal. Returns true if the cycle was dropped immediately.
    pub fn discard(&self, id: CycleId) -> bool {
        let Some(entry) = self.cycles.get(&id) else {
            return false;
        };
        entry.discard_requested.store(true, Ordering::Release);
        drop(entry);
        self.remove_if_unleased(id)
    }

    fn release(&self, id: CycleId) {
        let should_remove = match self.cycles.get(&id) {
            Some(entry) => {
                let prev = entry.leases.fetch_sub(1, Ordering::AcqRel);
                prev == 1 && entry.discard_requested.load(Ordering::Acquire)
            }
            None => false,
        };
        if should_remove {
            self.remove_if_unleased(id);
        }
    }

    fn remove_if_unleased(&self, id: CycleId) -> bool {
        let removed = self
            .cycles
            .remove_if(&id, |_, entry| {
                entry.discard_requested.load(Ordering::Acquire)
                    && entry.leases.load(Ordering::Acquire) == 0
            })
            .is_some();
        if removed {
            tracing::trace!(cycle = id.0, "cycle discarded");
        }
        removed
    }

    pub fn is_retained(&self, id: CycleId) -> bool {
        self.cycles.contains_key(&id)
    }

    pub fn lease_count(&self, id: CycleId) -> usize {
        self.cycles
            .get(&id)
            .map(|e| e.leases.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn retained_cycles(&self) -> Vec<CycleId> {
        let mut ids: Vec<CycleId> = self.cycles.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

/// Guard keeping one cycle retained. Released on drop.
pub struct CycleLease {
    manager: Arc<CycleLeaseManager>,
    cycle: Arc<ViewCycle>,
}

impl CycleLease {
    pub fn id(&self) -> CycleId {
        self.cycle.id()
    }

    pub fn cycle(&self) -> &ViewCycle {
        &self.cycle
    }

    /// A second lease on the same cycle.
    pub fn try_clone(&self) -> Result<CycleLease, LeaseError> {
        let entry = self
            .manager
            .cycles
            .get(&self.id())
            .ok_or(LeaseError::CycleNotRetained(self.id()))?;
        entry.leases.fetch_add(1, Ordering::AcqRel);
        Ok(CycleLease {
            manager: self.manager.clone(),
            cycle: self.cycle.clone(),
        })
    }

    pub fn release(self) {
        drop(self)
    }
}

impl Drop for CycleLease {
    fn drop(&mut self) {
        self.manager.release(self.cycle.id());
    }
}

impl std::fmt::Debug for CycleLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleLease").field("cycle", &self.id()).finish()
    }
}
