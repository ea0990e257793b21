//! Lightweight metrics for cycle execution

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters collected across the lifetime of a view process
#[derive(Default)]
pub struct CycleMetrics {
    // Timing
    pub last_cycle_ns: AtomicU64,
    pub total_cycle_ns: AtomicU64,

    // Outcomes
    pub cycles_completed: AtomicUsize,
    pub compilations: AtomicUsize,
    pub compilation_failures: AtomicUsize,

    // Node evaluation
    pub nodes_evaluated: AtomicUsize,
    pub node_failures: AtomicUsize,
    pub nodes_missing_inputs: AtomicUsize,
    pub nodes_in_cycles: AtomicUsize,
}

impl CycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, duration: Duration) {
        let ns = duration.as_nanos() as u64;
        self.last_cycle_ns.store(ns, Ordering::Relaxed);
        self.total_cycle_ns.fetch_add(ns, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compilation(&self, succeeded: bool) {
        self.compilations.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.compilation_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_nodes_evaluated(&self, count: usize) {
        self.nodes_evaluated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_node_failures(&self, count: usize) {
        self.node_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_nodes_missing_inputs(&self, count: usize) {
        self.nodes_missing_inputs.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_nodes_in_cycles(&self, count: usize) {
        self.nodes_in_cycles.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CycleMetricsSnapshot {
        CycleMetricsSnapshot {
            last_cycle_ms: self.last_cycle_ns.load(Ordering::Relaxed) / 1_000_000,
            total_cycle_ms: self.total_cycle_ns.load(Ordering::Relaxed) / 1_000_000,
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            compilation_failures: self.compilation_failures.load(Ordering::Relaxed),
            nodes_evaluated: self.nodes_evaluated.load(Ordering::Relaxed),
            node_failures: self.node_failures.load(Ordering::Relaxed),
            nodes_missing_inputs: self.nodes_missing_inputs.load(Ordering::Relaxed),
            nodes_in_cycles: self.nodes_in_cycles.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleMetricsSnapshot {
    pub last_cycle_ms: u64,
    pub total_cycle_ms: u64,
    pub cycles_completed: usize,
    pub compilations: usize,
    pub compilation_failures: usize,
    pub nodes_evaluated: usize,
    pub node_failures: usize,
    pub nodes_missing_inputs: usize,
    pub nodes_in_cycles: usize,
}

/// Timer for measuring a cycle
pub struct CycleTimer {
    start: Instant,
}

impl CycleTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
