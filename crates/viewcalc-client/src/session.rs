//! Client sessions attached to a view process.
//!
//! The process thread only ever pushes into a session's queue. A dedicated
//! delivery thread per session applies the live-update period, folds queued
//! updates together when it has to, refreshes the session's results cache and
//! finally calls the consumer's listeners.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use viewcalc_common::{ValueKind, ValueSpec};
use viewcalc_engine::{
    CompilationError, CycleLease, DeltaResultModel, EngineError, LeaseError, ListenerId,
    ResultModel, ViewProcess, ViewResultListener,
};

use crate::SessionConfig;
use crate::error::SessionError;
use crate::results_cache::{CachedResult, ResultsCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Updates are delivered as they arrive (or once per period).
    Live,
    /// Updates are received and merged but held back.
    Paused,
    /// Updates are dropped, except for the result of `run_one_cycle`.
    Stopped,
    Terminated,
}

pub trait ResultListener: Send + Sync {
    fn result_available(&self, result: &Arc<ResultModel>);
}

impl<F> ResultListener for F
where
    F: Fn(&Arc<ResultModel>) + Send + Sync,
{
    fn result_available(&self, result: &Arc<ResultModel>) {
        self(result)
    }
}

pub trait DeltaResultListener: Send + Sync {
    fn delta_available(&self, delta: &Arc<DeltaResultModel>);
}

impl<F> DeltaResultListener for F
where
    F: Fn(&Arc<DeltaResultModel>) + Send + Sync,
{
    fn delta_available(&self, delta: &Arc<DeltaResultModel>) {
        self(delta)
    }
}

#[derive(Clone)]
struct Update {
    full: Arc<ResultModel>,
    delta: Arc<DeltaResultModel>,
}

struct Control {
    state: ClientState,
    period: Duration,
    one_shot: bool,
    /// Each batch becomes exactly one delivery.
    queue: VecDeque<Vec<Update>>,
    /// Received but waiting for the next period boundary or for resumption.
    pending: Vec<Update>,
    last_delivery: Option<Instant>,
    shutdown: bool,
}

struct SessionShared {
    id: String,
    process: Arc<ViewProcess>,
    config: SessionConfig,
    control: Mutex<Control>,
    wake: Condvar,
    result_listener: RwLock<Option<Arc<dyn ResultListener>>>,
    delta_listener: RwLock<Option<Arc<dyn DeltaResultListener>>>,
    results: Mutex<ResultsCache>,
    latest: RwLock<Option<Arc<ResultModel>>>,
    cycle_access: AtomicBool,
}

pub struct ViewClient {
    shared: Arc<SessionShared>,
    listener_id: Mutex<Option<ListenerId>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ViewClient {
    /// Attach a new, stopped session to `process`.
    pub fn attach(process: Arc<ViewProcess>, config: SessionConfig) -> Result<Self, SessionError> {
        if process.is_terminated() {
            return Err(SessionError::Terminated);
        }
        let id = format!("{}-client-{}", process.name(), process.allocate_client_id());
        let shared = Arc::new(SessionShared {
            id: id.clone(),
            process,
            control: Mutex::new(Control {
                state: ClientState::Stopped,
                period: config.live_update_period,
                one_shot: false,
                queue: VecDeque::new(),
                pending: Vec::new(),
                last_delivery: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
            result_listener: RwLock::new(None),
            delta_listener: RwLock::new(None),
            results: Mutex::new(ResultsCache::new(config.results_history_size)),
            latest: RwLock::new(None),
            cycle_access: AtomicBool::new(false),
            config,
        });

        let delivery = shared.clone();
        let worker = std::thread::Builder::new()
            .name(format!("viewcalc-session-{id}"))
            .spawn(move || delivery.run_delivery())
            .map_err(EngineError::from)?;

        let listener_id = shared.process.attach_listener(Arc::new(SessionReceiver {
            session: Arc::downgrade(&shared),
        }));
        tracing::debug!(session = %id, "client session attached");

        Ok(Self {
            shared,
            listener_id: Mutex::new(Some(listener_id)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn unique_id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> ClientState {
        self.shared.control.lock().state
    }

    pub fn process(&self) -> &Arc<ViewProcess> {
        &self.shared.process
    }

    pub fn is_result_available(&self) -> bool {
        self.shared.latest.read().is_some()
    }

    /// Most recent full model delivered to this session.
    pub fn latest_result(&self) -> Option<Arc<ResultModel>> {
        self.shared.latest.read().clone()
    }

    pub fn cached_result(
        &self,
        config: &str,
        spec: &ValueSpec,
        expected: Option<ValueKind>,
    ) -> CachedResult {
        self.shared.results.lock().get_result(config, spec, expected)
    }

    /// Replaces any previous listener; `None` removes it.
    pub fn set_result_listener(&self, listener: Option<Arc<dyn ResultListener>>) {
        *self.shared.result_listener.write() = listener;
    }

    pub fn set_delta_listener(&self, listener: Option<Arc<dyn DeltaResultListener>>) {
        *self.shared.delta_listener.write() = listener;
    }

    pub fn live_update_period(&self) -> Duration {
        self.shared.control.lock().period
    }

    /// Zero releases anything waiting for a period boundary straight away.
    pub fn set_live_update_period(&self, period: Duration) {
        let mut control = self.shared.control.lock();
        control.period = period;
        if period.is_zero() && control.state == ClientState::Live && !control.pending.is_empty() {
            let batch = std::mem::take(&mut control.pending);
            control.queue.push_back(batch);
        }
        self.shared.wake.notify_all();
    }

    pub fn start_live(&self) -> Result<(), SessionError> {
        let mut control = self.shared.control.lock();
        match control.state {
            ClientState::Terminated => return Err(SessionError::Terminated),
            ClientState::Live => return Ok(()),
            ClientState::Paused => {
                if !control.pending.is_empty() {
                    let catch_up = std::mem::take(&mut control.pending);
                    control.queue.push_back(catch_up);
                }
            }
            ClientState::Stopped => {}
        }
        control.state = ClientState::Live;
        self.shared.wake.notify_all();
        tracing::debug!(session = %self.shared.id, "live updates started");
        Ok(())
    }

    /// Keep receiving, but hold updates back until [`start_live`](Self::start_live).
    pub fn pause_live(&self) -> Result<(), SessionError> {
        let mut control = self.shared.control.lock();
        match control.state {
            ClientState::Terminated => Err(SessionError::Terminated),
            ClientState::Stopped => Err(SessionError::InvalidState {
                operation: "pause live updates",
                state: ClientState::Stopped,
            }),
            ClientState::Paused => Ok(()),
            ClientState::Live => {
                let mut pending: Vec<Update> = control.queue.drain(..).flatten().collect();
                pending.append(&mut control.pending);
                control.pending = pending;
                control.state = ClientState::Paused;
                Ok(())
            }
        }
    }

    /// Drop anything not yet delivered and ignore further updates.
    pub fn stop_live(&self) -> Result<(), SessionError> {
        let mut control = self.shared.control.lock();
        if control.state == ClientState::Terminated {
            return Err(SessionError::Terminated);
        }
        control.state = ClientState::Stopped;
        control.queue.clear();
        control.pending.clear();
        control.one_shot = false;
        Ok(())
    }

    /// Trigger one cycle and block until it publishes. Only valid while
    /// stopped; the cycle's result is also delivered to the listeners.
    pub fn run_one_cycle(&self) -> Result<Arc<ResultModel>, SessionError> {
        {
            let mut control = self.shared.control.lock();
            if control.state != ClientState::Stopped {
                return Err(SessionError::InvalidState {
                    operation: "run one cycle",
                    state: control.state,
                });
            }
            control.one_shot = true;
        }

        let process = &self.shared.process;
        let next = process.next_cycle(false);
        let outcome = process
            .trigger_cycle()
            .map_err(SessionError::from)
            .and_then(|()| next.wait(self.shared.config.cycle_timeout).map_err(SessionError::from));
        match outcome {
            Ok(completion) => Ok(completion.result),
            Err(err) => {
                self.shared.control.lock().one_shot = false;
                Err(err)
            }
        }
    }

    pub fn is_cycle_access_supported(&self) -> bool {
        self.shared.cycle_access.load(Ordering::Acquire)
    }

    /// While enabled, the process keeps its latest cycle available for leases.
    pub fn set_cycle_access_supported(&self, supported: bool) {
        if self.shared.cycle_access.swap(supported, Ordering::AcqRel) == supported {
            return;
        }
        if supported {
            self.shared.process.enable_cycle_access();
        } else {
            self.shared.process.disable_cycle_access();
        }
    }

    pub fn create_latest_cycle_lease(&self) -> Result<CycleLease, SessionError> {
        if !self.is_cycle_access_supported() {
            return Err(SessionError::CycleAccessDisabled);
        }
        Ok(self.shared.process.latest_cycle_lease()?)
    }

    /// Trigger a cycle and return a lease on exactly that cycle.
    pub fn await_next_cycle(&self, timeout: Duration) -> Result<CycleLease, SessionError> {
        if self.state() == ClientState::Terminated {
            return Err(SessionError::Terminated);
        }
        let process = &self.shared.process;
        process.enable_cycle_access();
        let next = process.next_cycle(true);
        let outcome = process
            .trigger_cycle()
            .map_err(SessionError::from)
            .and_then(|()| next.wait(timeout).map_err(SessionError::from));
        process.disable_cycle_access();

        let completion = outcome?;
        tracing::debug!(
            session = %self.shared.id,
            cycle = %completion.result.cycle_id(),
            "awaited cycle published"
        );
        completion
            .lease
            .ok_or(SessionError::Lease(LeaseError::NoCycleAvailable))
    }

    /// Detach from the process and stop the delivery thread. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut control = self.shared.control.lock();
            if control.shutdown {
                return;
            }
            control.shutdown = true;
            control.state = ClientState::Terminated;
            control.queue.clear();
            control.pending.clear();
            self.shared.wake.notify_all();
        }

        if let Some(id) = self.listener_id.lock().take() {
            self.shared.process.detach_listener(id);
        }
        self.shared.result_listener.write().take();
        self.shared.delta_listener.write().take();
        if self.shared.cycle_access.swap(false, Ordering::AcqRel) {
            self.shared.process.disable_cycle_access();
        }

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!(session = %self.shared.id, "session delivery thread panicked");
            }
        }
        tracing::debug!(session = %self.shared.id, "client session shut down");
    }
}

impl Drop for ViewClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ViewClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewClient")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionShared {
    fn receive(&self, update: Update) {
        let mut control = self.control.lock();
        match control.state {
            ClientState::Live if control.period.is_zero() => control.queue.push_back(vec![update]),
            ClientState::Live | ClientState::Paused => control.pending.push(update),
            ClientState::Stopped if control.one_shot => {
                control.one_shot = false;
                control.queue.push_back(vec![update]);
            }
            ClientState::Stopped | ClientState::Terminated => return,
        }
        self.wake.notify_all();
    }

    fn run_delivery(&self) {
        while let Some(batch) = self.next_batch() {
            let Some(update) = fold(batch) else {
                continue;
            };
            self.deliver(update);
        }
    }

    /// Blocks until something is due. `None` once the session shuts down.
    fn next_batch(&self) -> Option<Vec<Update>> {
        let mut control = self.control.lock();
        loop {
            if control.shutdown {
                return None;
            }
            if let Some(batch) = control.queue.pop_front() {
                control.last_delivery = Some(Instant::now());
                return Some(batch);
            }
            if control.state == ClientState::Live && !control.pending.is_empty() {
                let due = control.last_delivery.map(|last| last + control.period);
                match due {
                    Some(due) if Instant::now() < due => {
                        self.wake.wait_until(&mut control, due);
                    }
                    _ => {
                        control.last_delivery = Some(Instant::now());
                        return Some(std::mem::take(&mut control.pending));
                    }
                }
                continue;
            }
            self.wake.wait(&mut control);
        }
    }

    fn deliver(&self, update: Update) {
        self.results.lock().put(&update.full);
        *self.latest.write() = Some(update.full.clone());

        let result_listener = self.result_listener.read().clone();
        let delta_listener = self.delta_listener.read().clone();
        let delivered = catch_unwind(AssertUnwindSafe(|| {
            if let Some(listener) = &result_listener {
                listener.result_available(&update.full);
            }
            if let Some(listener) = &delta_listener {
                listener.delta_available(&update.delta);
            }
        }));
        if delivered.is_err() {
            tracing::error!(
                session = %self.id,
                cycle = %update.full.cycle_id(),
                "result listener panicked"
            );
        }
    }
}

/// Later updates win per value; delta entries accumulate.
fn fold(batch: Vec<Update>) -> Option<Update> {
    let mut updates = batch.into_iter();
    let first = updates.next()?;
    let mut rest = updates.peekable();
    if rest.peek().is_none() {
        return Some(first);
    }
    let mut full = ResultModel::clone(&first.full);
    let mut delta = DeltaResultModel::clone(&first.delta);
    for update in rest {
        full.merge_from(&update.full);
        delta.merge_from(&update.delta);
    }
    Some(Update {
        full: Arc::new(full),
        delta: Arc::new(delta),
    })
}

/// Registered with the process; forwards into the session without blocking.
struct SessionReceiver {
    session: Weak<SessionShared>,
}

impl ViewResultListener for SessionReceiver {
    fn cycle_completed(&self, full: &Arc<ResultModel>, delta: &Arc<DeltaResultModel>) {
        if let Some(session) = self.session.upgrade() {
            session.receive(Update {
                full: full.clone(),
                delta: delta.clone(),
            });
        }
    }

    fn compilation_failed(&self, error: &CompilationError) {
        if let Some(session) = self.session.upgrade() {
            tracing::warn!(session = %session.id, error = %error, "view compilation failed");
        }
    }

    fn cycle_failed(&self, error: &EngineError) {
        if let Some(session) = self.session.upgrade() {
            tracing::warn!(session = %session.id, error = %error, "view cycle failed");
        }
    }

    fn process_terminated(&self) {
        if let Some(session) = self.session.upgrade() {
            let mut control = session.control.lock();
            control.state = ClientState::Terminated;
            control.queue.clear();
            control.pending.clear();
            session.wake.notify_all();
        }
    }
}
