//! Diagnostics (C14): hook liveness and tick timing.
//!
//! Pipeline counters (capture, outbound, persistence) live with the
//! pipelines they count, each exposing its own `*Counters`/`*Snapshot`
//! pair; this crate only covers the cross-cutting scheduler/hook concerns.
//!
//! Pure bookkeeping — no I/O. Every write is an atomic store; reads are
//! plain snapshots, never blocking.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub type Tick = u64;

/// Per-hook liveness: last tick it ran, and how many times.
#[derive(Default)]
struct HookRecord {
    last_tick: AtomicU64,
    execution_count: AtomicU64,
}

/// Tracks phase-hook liveness so a stalled hook can be detected without
/// the hook itself reporting failure.
#[derive(Default)]
pub struct HookLiveness {
    hooks: Mutex<HashMap<String, HookRecord>>,
}

impl HookLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&self, hook_name: &str, tick: Tick) {
        let hooks = self.hooks.lock().unwrap();
        if let Some(record) = hooks.get(hook_name) {
            record.last_tick.store(tick, Ordering::Release);
            record.execution_count.fetch_add(1, Ordering::AcqRel);
            return;
        }
        drop(hooks);
        let mut hooks = self.hooks.lock().unwrap();
        let record = hooks.entry(hook_name.to_string()).or_default();
        record.last_tick.store(tick, Ordering::Release);
        record.execution_count.fetch_add(1, Ordering::AcqRel);
    }

    /// `current_tick - last_tick >= threshold`, or `true` if the hook has
    /// never executed.
    pub fn is_stale(&self, hook_name: &str, current_tick: Tick, threshold: Tick) -> bool {
        let hooks = self.hooks.lock().unwrap();
        match hooks.get(hook_name) {
            Some(record) => {
                current_tick.saturating_sub(record.last_tick.load(Ordering::Acquire)) >= threshold
            }
            None => true,
        }
    }

    pub fn execution_count(&self, hook_name: &str) -> u64 {
        self.hooks
            .lock()
            .unwrap()
            .get(hook_name)
            .map(|r| r.execution_count.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

/// Per-tick scheduler diagnostics (C2): duration, overrun flag, clamp flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickDiagnostics {
    pub tick: Tick,
    pub duration_micros: u64,
    pub overran: bool,
    pub clamped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_executed_hook_is_stale() {
        let liveness = HookLiveness::new();
        assert!(liveness.is_stale("replication", 100, 1));
    }

    #[test]
    fn staleness_respects_threshold() {
        let liveness = HookLiveness::new();
        liveness.record_execution("replication", 10);
        assert!(!liveness.is_stale("replication", 12, 5));
        assert!(liveness.is_stale("replication", 16, 5));
    }

    #[test]
    fn execution_count_accumulates() {
        let liveness = HookLiveness::new();
        liveness.record_execution("persistence", 1);
        liveness.record_execution("persistence", 2);
        assert_eq!(liveness.execution_count("persistence"), 2);
    }
}
