//! Effect buffer (C5): per-tick staging of mutations, committed only at
//! Post-Tick Finalization.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Hard ceiling on buffered commands per tick.
pub const DEFAULT_CAPACITY: usize = 512;

/// One of the three effect command kinds a simulation participant may
/// buffer during Simulation Execution.
pub enum EffectCommand {
    /// Invokes a combat commit sink's closure with its resolution once the
    /// buffer commits.
    CombatOutcomeCommit(Box<dyn FnOnce() + Send>),
    /// Marks a flag `is_marked` at commit time.
    FlagSignal(Arc<AtomicBool>),
    /// Appends an entry to a target log at commit time.
    AppendLog(Arc<Mutex<Vec<String>>>, String),
}

impl fmt::Debug for EffectCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectCommand::CombatOutcomeCommit(_) => write!(f, "CombatOutcomeCommit(..)"),
            EffectCommand::FlagSignal(_) => write!(f, "FlagSignal(..)"),
            EffectCommand::AppendLog(_, entry) => write!(f, "AppendLog({entry:?})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectBufferError {
    /// Buffering was attempted while no tick window was open.
    BufferedOutsideTickWindow,
    /// The hard capacity was exceeded.
    CapacityExceeded,
}

impl fmt::Display for EffectBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectBufferError::BufferedOutsideTickWindow => {
                write!(f, "effect buffered outside an open tick window")
            }
            EffectBufferError::CapacityExceeded => write!(f, "effect buffer capacity exceeded"),
        }
    }
}

impl std::error::Error for EffectBufferError {}

/// Bounded per-tick staging buffer. Buffering has no ordering guarantee
/// beyond insertion order; commit drains sequentially on the tick thread.
pub struct EffectBuffer {
    commands: Vec<EffectCommand>,
    capacity: usize,
    open: bool,
}

impl EffectBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            commands: Vec::new(),
            capacity,
            open: false,
        }
    }

    /// Open the tick window: clears any stale state and allows buffering.
    pub fn open_window(&mut self) {
        self.commands.clear();
        self.open = true;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn buffer(&mut self, command: EffectCommand) -> Result<(), EffectBufferError> {
        if !self.open {
            return Err(EffectBufferError::BufferedOutsideTickWindow);
        }
        if self.commands.len() >= self.capacity {
            return Err(EffectBufferError::CapacityExceeded);
        }
        self.commands.push(command);
        Ok(())
    }

    /// Drain and apply every buffered command in insertion order, then
    /// close the window. The window closes even if draining is empty or
    /// the caller never committed anything — end-of-tick always clears.
    pub fn commit(&mut self) {
        for command in self.commands.drain(..) {
            match command {
                EffectCommand::CombatOutcomeCommit(sink) => sink(),
                EffectCommand::FlagSignal(flag) => flag.store(true, Ordering::Release),
                EffectCommand::AppendLog(target, entry) => {
                    target.lock().unwrap().push(entry);
                }
            }
        }
        self.open = false;
    }

    /// Discard the window without applying anything (used when a fatal
    /// invariant violation preempts commit).
    pub fn discard(&mut self) {
        self.commands.clear();
        self.open = false;
    }
}

impl Default for EffectBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffering_outside_window_is_fatal() {
        let mut buf = EffectBuffer::new(4);
        let result = buf.buffer(EffectCommand::FlagSignal(Arc::new(AtomicBool::new(false))));
        assert_eq!(result, Err(EffectBufferError::BufferedOutsideTickWindow));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut buf = EffectBuffer::new(1);
        buf.open_window();
        let flag = Arc::new(AtomicBool::new(false));
        assert!(buf.buffer(EffectCommand::FlagSignal(flag.clone())).is_ok());
        let result = buf.buffer(EffectCommand::FlagSignal(flag));
        assert_eq!(result, Err(EffectBufferError::CapacityExceeded));
    }

    #[test]
    fn commit_applies_in_insertion_order() {
        let mut buf = EffectBuffer::new(8);
        buf.open_window();
        let log = Arc::new(Mutex::new(Vec::new()));
        buf.buffer(EffectCommand::AppendLog(log.clone(), "a".to_string()))
            .unwrap();
        buf.buffer(EffectCommand::AppendLog(log.clone(), "b".to_string()))
            .unwrap();
        buf.buffer(EffectCommand::AppendLog(log.clone(), "c".to_string()))
            .unwrap();
        buf.commit();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(buf.is_empty());
        assert!(!buf.is_open());
    }

    #[test]
    fn flag_signal_marks_on_commit() {
        let mut buf = EffectBuffer::new(4);
        buf.open_window();
        let flag = Arc::new(AtomicBool::new(false));
        buf.buffer(EffectCommand::FlagSignal(flag.clone())).unwrap();
        assert!(!flag.load(Ordering::Acquire));
        buf.commit();
        assert!(flag.load(Ordering::Acquire));
    }

    #[test]
    fn combat_outcome_commit_invokes_sink() {
        let mut buf = EffectBuffer::new(4);
        buf.open_window();
        let applied = Arc::new(AtomicBool::new(false));
        let applied_clone = applied.clone();
        buf.buffer(EffectCommand::CombatOutcomeCommit(Box::new(move || {
            applied_clone.store(true, Ordering::Release);
        })))
        .unwrap();
        buf.commit();
        assert!(applied.load(Ordering::Acquire));
    }

    #[test]
    fn discard_clears_without_applying() {
        let mut buf = EffectBuffer::new(4);
        buf.open_window();
        let flag = Arc::new(AtomicBool::new(false));
        buf.buffer(EffectCommand::FlagSignal(flag.clone())).unwrap();
        buf.discard();
        assert!(!flag.load(Ordering::Acquire));
        assert!(buf.is_empty());
        assert!(!buf.is_open());
    }

    #[test]
    fn reopening_clears_stale_commands() {
        let mut buf = EffectBuffer::new(4);
        buf.open_window();
        let log = Arc::new(Mutex::new(Vec::new()));
        buf.buffer(EffectCommand::AppendLog(log.clone(), "stale".to_string()))
            .unwrap();
        // Window never committed; re-opening for the next tick must drop it.
        buf.open_window();
        buf.commit();
        assert!(log.lock().unwrap().is_empty());
    }
}
