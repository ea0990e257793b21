//! The long-lived computation loop for one view.
//!
//! A [`ViewProcess`] owns a background thread that waits for a trigger (or
//! its continuous period), compiles the view if needed, evaluates a cycle and
//! publishes the result to listeners and awaiters. The latest cycle is kept
//! leasable only while someone has asked for cycle access.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;
use viewcalc_common::ValueRequirement;

use crate::awaiter::{self, CycleCompletion, CycleNotifier, NextCycle, WaitError};
use crate::cycle::{CycleEvaluator, CycleId, ViewCycle};
use crate::lease::{CycleLease, CycleLeaseManager, LeaseError};
use crate::listener::{ListenerId, ViewResultListener};
use crate::live_data::LiveDataProvider;
use crate::metrics::{CycleMetrics, CycleMetricsSnapshot, CycleTimer};
use crate::result::{DeltaResultModel, ResultModel};
use crate::view::{CompilationError, CompiledView, GraphBuilder, ViewDefinition};
use crate::{EngineConfig, ExecutionMode};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn view process thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("view process `{0}` has terminated")]
    Terminated(String),

    #[error("cycle {cycle} failed: {message}")]
    CycleFailed { cycle: CycleId, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Compiling,
    Evaluating,
    Published,
    Terminated,
}

struct Control {
    state: ProcessState,
    trigger_pending: bool,
    recompile_requested: bool,
    stop: bool,
}

struct Shared {
    definition: Arc<ViewDefinition>,
    builder: Arc<dyn GraphBuilder>,
    live_data: Arc<dyn LiveDataProvider>,
    config: EngineConfig,
    control: Mutex<Control>,
    wake: Condvar,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ViewResultListener>)>>,
    next_listener_id: AtomicU64,
    next_client_id: AtomicU64,
    awaiters: Mutex<Vec<CycleNotifier>>,
    leases: Arc<CycleLeaseManager>,
    cycle_access: AtomicUsize,
    latest_cycle: Mutex<Option<CycleId>>,
    latest_result: RwLock<Option<Arc<ResultModel>>>,
    metrics: CycleMetrics,
}

pub struct ViewProcess {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ViewProcess {
    /// Spawn the process thread. No cycle runs until triggered, unless the
    /// execution mode is continuous.
    pub fn start(
        definition: ViewDefinition,
        builder: Arc<dyn GraphBuilder>,
        live_data: Arc<dyn LiveDataProvider>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let thread_pool = if config.enable_parallel {
            let mut pool = ThreadPoolBuilder::new();
            if let Some(max_threads) = config.max_threads {
                pool = pool.num_threads(max_threads);
            }
            match pool.build() {
                Ok(pool) => Some(pool),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "thread pool unavailable; evaluating sequentially"
                    );
                    None
                }
            }
        } else {
            None
        };

        let name = definition.name().to_string();
        let shared = Arc::new(Shared {
            definition: Arc::new(definition),
            builder,
            live_data,
            config,
            control: Mutex::new(Control {
                state: ProcessState::Idle,
                trigger_pending: false,
                recompile_requested: false,
                stop: false,
            }),
            wake: Condvar::new(),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            next_client_id: AtomicU64::new(1),
            awaiters: Mutex::new(Vec::new()),
            leases: CycleLeaseManager::new(),
            cycle_access: AtomicUsize::new(0),
            latest_cycle: Mutex::new(None),
            latest_result: RwLock::new(None),
            metrics: CycleMetrics::new(),
        });

        let cycle_loop = CycleLoop {
            shared: shared.clone(),
            compiled: None,
            subscribed: BTreeSet::new(),
            previous: None,
            next_id: 1,
            thread_pool,
            last_cycle_start: None,
        };
        let worker = std::thread::Builder::new()
            .name(format!("viewcalc-{name}"))
            .spawn(move || cycle_loop.run())?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        self.shared.definition.name()
    }

    pub fn definition(&self) -> &Arc<ViewDefinition> {
        &self.shared.definition
    }

    pub fn state(&self) -> ProcessState {
        self.shared.control.lock().state
    }

    pub fn is_terminated(&self) -> bool {
        let control = self.shared.control.lock();
        control.stop || control.state == ProcessState::Terminated
    }

    /// Request a cycle. Triggers arriving while a cycle runs coalesce into one.
    pub fn trigger_cycle(&self) -> Result<(), EngineError> {
        let mut control = self.shared.control.lock();
        if control.stop {
            return Err(EngineError::Terminated(self.name().to_string()));
        }
        control.trigger_pending = true;
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Discard the compiled view; the next cycle compiles afresh.
    pub fn request_recompile(&self) -> Result<(), EngineError> {
        let mut control = self.shared.control.lock();
        if control.stop {
            return Err(EngineError::Terminated(self.name().to_string()));
        }
        control.recompile_requested = true;
        Ok(())
    }

    /// Stop the loop and wait for the thread. Idempotent.
    pub fn stop(&self) {
        {
            let mut control = self.shared.control.lock();
            control.stop = true;
            self.shared.wake.notify_all();
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!(view = self.name(), "view process thread panicked");
            }
        }
    }

    pub fn attach_listener(&self, listener: Arc<dyn ViewResultListener>) -> ListenerId {
        let id = ListenerId(self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners.write().push((id, listener));
        id
    }

    pub fn detach_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Register for the next publication. With `wants_lease` the completion
    /// carries a lease on the published cycle.
    pub fn next_cycle(&self, wants_lease: bool) -> NextCycle {
        let (next, notifier) = awaiter::next_cycle(wants_lease);
        // Checked under the awaiter lock so termination cannot strand the wait.
        let mut awaiters = self.shared.awaiters.lock();
        if self.state() == ProcessState::Terminated {
            notifier.complete(Err(WaitError::Terminated));
        } else {
            awaiters.retain(|a| !a.is_abandoned());
            awaiters.push(notifier);
        }
        next
    }

    pub fn enable_cycle_access(&self) {
        self.shared.cycle_access.fetch_add(1, Ordering::AcqRel);
    }

    pub fn disable_cycle_access(&self) {
        let prev = self
            .shared
            .cycle_access
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            let latest = self.shared.latest_cycle.lock().take();
            if let Some(id) = latest {
                self.shared.leases.discard(id);
            }
        }
    }

    pub fn cycle_access_enabled(&self) -> bool {
        self.shared.cycle_access.load(Ordering::Acquire) > 0
    }

    /// Lease the most recently published cycle.
    pub fn latest_cycle_lease(&self) -> Result<CycleLease, LeaseError> {
        for _ in 0..3 {
            let latest = *self.shared.latest_cycle.lock();
            let id = latest.ok_or(LeaseError::NoCycleAvailable)?;
            match self.shared.leases.acquire(id) {
                Ok(lease) => return Ok(lease),
                Err(err) if *self.shared.latest_cycle.lock() == Some(id) => return Err(err),
                Err(_) => continue,
            }
        }
        Err(LeaseError::NoCycleAvailable)
    }

    pub fn latest_result(&self) -> Option<Arc<ResultModel>> {
        self.shared.latest_result.read().clone()
    }

    pub fn lease_manager(&self) -> &Arc<CycleLeaseManager> {
        &self.shared.leases
    }

    pub fn metrics(&self) -> CycleMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Process-scoped identifier for a client session.
    pub fn allocate_client_id(&self) -> u64 {
        self.shared.next_client_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for ViewProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ViewProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewProcess")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn set_state(&self, state: ProcessState) {
        self.control.lock().state = state;
    }

    fn listener_snapshot(&self) -> Vec<Arc<dyn ViewResultListener>> {
        self.listeners.read().iter().map(|(_, l)| l.clone()).collect()
    }

    fn publish(
        &self,
        cycle: Arc<ViewCycle>,
        full: &Arc<ResultModel>,
        delta: &Arc<DeltaResultModel>,
    ) {
        *self.latest_result.write() = Some(full.clone());

        let awaiters = std::mem::take(&mut *self.awaiters.lock());
        let id = cycle.id();
        let retain = self.config.retain_latest_cycle
            || self.cycle_access.load(Ordering::Acquire) > 0
            || awaiters.iter().any(|a| a.wants_lease() && !a.is_abandoned());
        if retain {
            self.leases.retain(cycle);
        }
        let previous = std::mem::replace(&mut *self.latest_cycle.lock(), retain.then_some(id));
        if let Some(prev) = previous.filter(|p| *p != id) {
            self.leases.discard(prev);
        }

        for listener in self.listener_snapshot() {
            listener.cycle_completed(full, delta);
        }

        for awaiter in awaiters {
            if awaiter.is_abandoned() {
                continue;
            }
            let lease = if awaiter.wants_lease() && retain {
                self.leases.acquire(id).ok()
            } else {
                None
            };
            awaiter.complete(Ok(CycleCompletion {
                result: full.clone(),
                delta: delta.clone(),
                lease,
            }));
        }
    }

    fn cycle_failed(&self, error: &EngineError) {
        for listener in self.listener_snapshot() {
            listener.cycle_failed(error);
        }
        let awaiters = std::mem::take(&mut *self.awaiters.lock());
        for awaiter in awaiters {
            awaiter.complete(Err(WaitError::CycleFailed(error.to_string())));
        }
    }

    fn compilation_failed(&self, error: &CompilationError) {
        for listener in self.listener_snapshot() {
            listener.compilation_failed(error);
        }
        let awaiters = std::mem::take(&mut *self.awaiters.lock());
        for awaiter in awaiters {
            awaiter.complete(Err(WaitError::CompilationFailed(error.clone())));
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic during evaluation".to_string())
}

/// State owned by the process thread.
struct CycleLoop {
    shared: Arc<Shared>,
    compiled: Option<Arc<CompiledView>>,
    subscribed: BTreeSet<ValueRequirement>,
    previous: Option<Arc<ResultModel>>,
    next_id: u64,
    thread_pool: Option<ThreadPool>,
    last_cycle_start: Option<Instant>,
}

impl CycleLoop {
    fn run(mut self) {
        tracing::info!(view = self.shared.definition.name(), "view process started");
        while let Some(recompile) = self.wait_for_work() {
            if recompile {
                self.compiled = None;
            }
            self.run_cycle();
        }
        self.terminate();
    }

    /// Blocks until a cycle is due. `None` means stop; `Some(true)` asks for
    /// a fresh compilation first.
    fn wait_for_work(&self) -> Option<bool> {
        let shared = &self.shared;
        let mut control = shared.control.lock();
        loop {
            if control.stop {
                return None;
            }
            if control.trigger_pending {
                control.trigger_pending = false;
                return Some(std::mem::take(&mut control.recompile_requested));
            }
            match shared.config.execution_mode {
                ExecutionMode::Triggered => shared.wake.wait(&mut control),
                ExecutionMode::Continuous { min_period } => {
                    let due = self.last_cycle_start.map(|start| start + min_period);
                    match due {
                        Some(due) if Instant::now() < due => {
                            shared.wake.wait_until(&mut control, due);
                        }
                        _ => return Some(std::mem::take(&mut control.recompile_requested)),
                    }
                }
            }
        }
    }

    fn run_cycle(&mut self) {
        let cycle_id = CycleId(self.next_id);
        self.next_id += 1;
        self.last_cycle_start = Some(Instant::now());
        let valuation_time = Utc::now();

        let _span = tracing::info_span!(
            "view_cycle",
            view = self.shared.definition.name(),
            cycle = cycle_id.0
        )
        .entered();
        let timer = CycleTimer::start();

        let Some(compiled) = self.ensure_compiled(valuation_time) else {
            self.shared.set_state(ProcessState::Idle);
            return;
        };
        self.ensure_subscriptions(&compiled);

        self.shared.set_state(ProcessState::Evaluating);
        let executed = catch_unwind(AssertUnwindSafe(|| {
            let snapshot = self.shared.live_data.snapshot();
            CycleEvaluator::new(&compiled, &snapshot)
                .with_thread_pool(
                    self.thread_pool.as_ref(),
                    self.shared.config.parallel_layer_threshold,
                )
                .with_metrics(&self.shared.metrics)
                .execute(cycle_id, valuation_time)
        }));
        let cycle = match executed {
            Ok(cycle) => Arc::new(cycle),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(error = %message, "cycle execution failed");
                self.shared.cycle_failed(&EngineError::CycleFailed {
                    cycle: cycle_id,
                    message,
                });
                self.shared.set_state(ProcessState::Idle);
                return;
            }
        };

        let full = cycle.result().clone();
        let delta = Arc::new(DeltaResultModel::between(self.previous.as_deref(), &full));
        self.shared.publish(cycle, &full, &delta);
        self.previous = Some(full);
        self.shared.set_state(ProcessState::Published);

        self.shared.metrics.record_cycle(timer.elapsed());
        tracing::info!("Completed one recalculation pass in {}ms", timer.elapsed_ms());
    }

    fn ensure_compiled(&mut self, valuation_time: DateTime<Utc>) -> Option<Arc<CompiledView>> {
        if let Some(compiled) = &self.compiled {
            return Some(compiled.clone());
        }
        self.shared.set_state(ProcessState::Compiling);
        match self
            .shared
            .builder
            .compile(&self.shared.definition, valuation_time)
        {
            Ok(view) => {
                self.shared.metrics.record_compilation(true);
                tracing::info!(nodes = view.node_count(), "view compiled");
                let view = Arc::new(view);
                self.compiled = Some(view.clone());
                Some(view)
            }
            Err(err) => {
                self.shared.metrics.record_compilation(false);
                tracing::warn!(error = %err, "view compilation failed");
                self.shared.compilation_failed(&err);
                None
            }
        }
    }

    /// Subscriptions only grow while the process lives.
    fn ensure_subscriptions(&mut self, compiled: &CompiledView) {
        let new: Vec<ValueRequirement> = compiled
            .live_data_requirements()
            .into_iter()
            .filter(|r| !self.subscribed.contains(r))
            .collect();
        if new.is_empty() {
            return;
        }
        tracing::debug!(count = new.len(), "subscribing to live data");
        self.shared.live_data.subscribe(&new);
        self.subscribed.extend(new);
    }

    fn terminate(&mut self) {
        self.shared.set_state(ProcessState::Terminated);

        let awaiters = std::mem::take(&mut *self.shared.awaiters.lock());
        for awaiter in awaiters {
            awaiter.complete(Err(WaitError::Terminated));
        }
        for listener in self.shared.listener_snapshot() {
            listener.process_terminated();
        }
        if let Some(id) = self.shared.latest_cycle.lock().take() {
            self.shared.leases.discard(id);
        }
        if !self.subscribed.is_empty() {
            let subscribed: Vec<ValueRequirement> =
                std::mem::take(&mut self.subscribed).into_iter().collect();
            self.shared.live_data.unsubscribe(&subscribed);
        }
        tracing::info!(view = self.shared.definition.name(), "view process terminated");
    }
}
