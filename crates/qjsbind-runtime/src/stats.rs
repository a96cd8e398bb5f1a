//! Per-context counters

use std::cell::Cell;

/// Counters updated by an engine context as it runs.
///
/// The context is single-threaded, so plain cells suffice.
#[derive(Debug, Default)]
pub(crate) struct ContextStats {
    pub(crate) evaluations: Cell<u64>,
    pub(crate) script_failures: Cell<u64>,
    pub(crate) jobs_executed: Cell<u64>,
    pub(crate) holds: Cell<u64>,
    pub(crate) held_released: Cell<u64>,
    pub(crate) handle_releases: Cell<u64>,
}

impl ContextStats {
    pub(crate) fn bump(counter: &Cell<u64>, by: u64) {
        counter.set(counter.get() + by);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            evaluations: self.evaluations.get(),
            script_failures: self.script_failures.get(),
            jobs_executed: self.jobs_executed.get(),
            holds: self.holds.get(),
            held_released: self.held_released.get(),
            handle_releases: self.handle_releases.get(),
        }
    }
}

/// A point-in-time snapshot of context statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Top-level entry points run (evaluate, evaluate_module, call, execute)
    pub evaluations: u64,
    /// Script failures routed through the exception bridge
    pub script_failures: u64,
    /// Deferred jobs run by the job loop
    pub jobs_executed: u64,
    /// Values handed to the reference tracker
    pub holds: u64,
    /// Tracker entries released, by sweep or forced cleanup
    pub held_released: u64,
    /// Engine references released by dropping or freeing handles
    pub handle_releases: u64,
}

impl StatsSnapshot {
    /// Tracker entries still awaiting release
    pub fn held_outstanding(&self) -> u64 {
        self.holds.saturating_sub(self.held_released)
    }
}
