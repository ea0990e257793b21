//! Single-shot waits for the next cycle completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::lease::CycleLease;
use crate::result::{DeltaResultModel, ResultModel};
use crate::view::CompilationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WaitError {
    #[error("timed out after {0:?} waiting for the next cycle")]
    Timeout(Duration),

    #[error("wait cancelled")]
    Cancelled,

    #[error("view compilation failed: {0}")]
    CompilationFailed(CompilationError),

    #[error("cycle failed: {0}")]
    CycleFailed(String),

    #[error("view process terminated")]
    Terminated,
}

/// What an awaiter receives when a cycle publishes.
#[derive(Debug)]
pub struct CycleCompletion {
    pub result: Arc<ResultModel>,
    pub delta: Arc<DeltaResultModel>,
    /// Present when the awaiter asked for one and the cycle could be leased.
    pub lease: Option<CycleLease>,
}

struct Slot {
    outcome: Mutex<SlotState>,
    ready: Condvar,
}

enum SlotState {
    Pending,
    Done(Result<CycleCompletion, WaitError>),
    Taken,
}

/// Consumer side of a single-shot wait. Completes at most once.
pub struct NextCycle {
    slot: Arc<Slot>,
}

/// Cancels a [`NextCycle`] from another thread.
#[derive(Clone)]
pub struct CancelHandle {
    slot: Arc<Slot>,
}

/// Producer side, held by the view process.
pub(crate) struct CycleNotifier {
    slot: Arc<Slot>,
    wants_lease: bool,
}

pub(crate) fn next_cycle(wants_lease: bool) -> (NextCycle, CycleNotifier) {
    let slot = Arc::new(Slot {
        outcome: Mutex::new(SlotState::Pending),
        ready: Condvar::new(),
    });
    (
        NextCycle { slot: slot.clone() },
        CycleNotifier { slot, wants_lease },
    )
}

impl Slot {
    fn complete(&self, outcome: Result<CycleCompletion, WaitError>) -> bool {
        let mut state = self.outcome.lock();
        if !matches!(*state, SlotState::Pending) {
            return false;
        }
        *state = SlotState::Done(outcome);
        self.ready.notify_all();
        true
    }
}

impl NextCycle {
    /// Block until the cycle completes, the wait is cancelled, or `timeout`
    /// elapses. A timed-out wait is cancelled so a late completion is dropped.
    pub fn wait(self, timeout: Duration) -> Result<CycleCompletion, WaitError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.outcome.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Done(outcome) => return outcome,
                SlotState::Taken => return Err(WaitError::Cancelled),
                SlotState::Pending => *state = SlotState::Pending,
            }
            if self.slot.ready.wait_until(&mut state, deadline).timed_out() {
                if let SlotState::Done(outcome) = std::mem::replace(&mut *state, SlotState::Taken) {
                    return outcome;
                }
                return Err(WaitError::Timeout(timeout));
            }
        }
    }

    pub fn try_take(&self) -> Option<Result<CycleCompletion, WaitError>> {
        let mut state = self.slot.outcome.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Done(outcome) => Some(outcome),
            other => {
                *state = other;
                None
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        !matches!(*self.slot.outcome.lock(), SlotState::Pending)
    }

    pub fn cancel(&self) {
        self.slot.complete(Err(WaitError::Cancelled));
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            slot: self.slot.clone(),
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.slot.complete(Err(WaitError::Cancelled));
    }
}

impl CycleNotifier {
    pub(crate) fn wants_lease(&self) -> bool {
        self.wants_lease
    }

    /// Nobody can observe the outcome any more.
    pub(crate) fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.slot) == 1
            || !matches!(*self.slot.outcome.lock(), SlotState::Pending)
    }

    pub(crate) fn complete(self, outcome: Result<CycleCompletion, WaitError>) -> bool {
        self.slot.complete(outcome)
    }
}
