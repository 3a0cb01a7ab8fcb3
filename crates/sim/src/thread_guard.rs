//! Tick-thread identity capture and phase tracking.
//!
//! Ref spec Design Notes §9 "Tick-thread enforcement": a process-wide
//! identity is captured when the scheduler's loop starts and cleared at
//! shutdown. Every `TickThreadOnly` function asserts the current worker
//! matches. `IsMutationAllowedNow()` is derived from the current tick
//! phase, consulted by C6/C8/C10 before mutating or capturing.

use std::sync::Mutex;
use std::thread::ThreadId;

/// The phase the tick is currently in, as driven by the simulation core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// No tick in progress.
    Idle,
    /// Pre-Tick Gate Evaluation: gates run, hooks' pre-tick callback fires.
    PreTick,
    /// Simulation Execution: participants run; mutation goes through the
    /// effect buffer only.
    Execution,
    /// Post-Tick Finalization: gate stability check, effect commit,
    /// post-tick hooks, replication capture.
    PostTick,
}

/// Shared tick-thread identity and phase tracker.
///
/// Cheap to clone via `Arc`; every subsystem that enforces `TickThreadOnly`
/// or consults `IsMutationAllowedNow()` holds a reference to the same
/// instance as the scheduler that drives the loop.
pub struct TickThreadGuard {
    thread_id: Mutex<Option<ThreadId>>,
    phase: Mutex<TickPhase>,
}

impl TickThreadGuard {
    pub fn new() -> Self {
        Self {
            thread_id: Mutex::new(None),
            phase: Mutex::new(TickPhase::Idle),
        }
    }

    /// Capture the calling thread as the tick thread. Called once by the
    /// scheduler at loop start.
    pub fn capture_current_thread(&self) {
        *self.thread_id.lock().unwrap() = Some(std::thread::current().id());
    }

    /// Clear the captured identity. Called by the scheduler at shutdown.
    pub fn clear(&self) {
        *self.thread_id.lock().unwrap() = None;
        *self.phase.lock().unwrap() = TickPhase::Idle;
    }

    /// Panics with `TickThreadViolation` if the caller is not the captured
    /// tick thread (or no thread has been captured yet).
    pub fn assert_tick_thread(&self) {
        let expected = *self.thread_id.lock().unwrap();
        match expected {
            Some(id) if id == std::thread::current().id() => {}
            Some(_) => panic!("TickThreadViolation: called off the tick thread"),
            None => panic!("TickThreadViolation: no tick thread has been captured"),
        }
    }

    pub fn is_tick_thread(&self) -> bool {
        match *self.thread_id.lock().unwrap() {
            Some(id) => id == std::thread::current().id(),
            None => false,
        }
    }

    pub fn set_phase(&self, phase: TickPhase) {
        *self.phase.lock().unwrap() = phase;
    }

    pub fn phase(&self) -> TickPhase {
        *self.phase.lock().unwrap()
    }

    /// `IsMutationAllowedNow()`: mutation of authoritative gameplay state is
    /// permitted only while the simulation core is executing participants
    /// or finalizing (effect buffer commit happens at the Post-Tick edge).
    pub fn is_mutation_allowed_now(&self) -> bool {
        matches!(self.phase(), TickPhase::Execution | TickPhase::PostTick)
    }
}

impl Default for TickThreadGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncaptured_guard_rejects_mutation() {
        let guard = TickThreadGuard::new();
        assert!(!guard.is_mutation_allowed_now());
        assert!(!guard.is_tick_thread());
    }

    #[test]
    fn capture_on_current_thread_passes_assertion() {
        let guard = TickThreadGuard::new();
        guard.capture_current_thread();
        guard.assert_tick_thread();
        assert!(guard.is_tick_thread());
    }

    #[test]
    #[should_panic(expected = "TickThreadViolation")]
    fn capture_on_other_thread_fails_assertion() {
        let guard = std::sync::Arc::new(TickThreadGuard::new());
        let other = guard.clone();
        std::thread::spawn(move || other.capture_current_thread())
            .join()
            .unwrap();
        guard.assert_tick_thread();
    }

    #[test]
    fn mutation_allowed_only_in_execution_and_post_tick() {
        let guard = TickThreadGuard::new();
        guard.set_phase(TickPhase::Idle);
        assert!(!guard.is_mutation_allowed_now());
        guard.set_phase(TickPhase::PreTick);
        assert!(!guard.is_mutation_allowed_now());
        guard.set_phase(TickPhase::Execution);
        assert!(guard.is_mutation_allowed_now());
        guard.set_phase(TickPhase::PostTick);
        assert!(guard.is_mutation_allowed_now());
    }

    #[test]
    fn clear_resets_identity_and_phase() {
        let guard = TickThreadGuard::new();
        guard.capture_current_thread();
        guard.set_phase(TickPhase::Execution);
        guard.clear();
        assert!(!guard.is_tick_thread());
        assert_eq!(guard.phase(), TickPhase::Idle);
    }
}
