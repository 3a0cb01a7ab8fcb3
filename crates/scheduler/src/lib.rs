//! Tick scheduler (C2): drives the tick loop on one dedicated worker.
//!
//! The worker's identity is captured once at loop start as the tick
//! thread; everything `TickThreadOnly` downstream asserts against it.
//! Sleeping between ticks uses a bounded `crossbeam_channel` so `stop()`
//! wakes the loop immediately from any thread, the same way a park/unpark
//! pair would, without needing the unstable thread-parking dance. The
//! channel wait is only trusted down to `BUSY_SPIN_THRESHOLD` before the
//! deadline; the last stretch busy-spins instead, since wake-up jitter at
//! that scale would blow the tick boundary.

#![deny(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use tickcore_diagnostics::TickDiagnostics;
use tickcore_sim::{Tick, TickThreadGuard};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_CATCH_UP_TICKS_PER_LOOP: u32 = 3;

/// Below this much remaining time, the loop busy-spins instead of parking
/// in `recv_timeout` — channel/OS wake-up jitter is too coarse for
/// tick-boundary precision this close to the deadline.
const BUSY_SPIN_THRESHOLD: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub max_catch_up_ticks_per_loop: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_catch_up_ticks_per_loop: MAX_CATCH_UP_TICKS_PER_LOOP,
        }
    }
}

/// A fatal tick failure, carrying the diagnostic string the runtime host
/// surfaces before it decides whether to restart.
#[derive(Debug, Clone)]
pub struct TickDriverFault(pub String);

impl std::fmt::Display for TickDriverFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TickDriverFault {}

/// Whatever the scheduler drives — typically a `SimulationCore` plus its
/// entity index, combat pipeline, and replication hooks wired by the host.
pub trait TickDriver: Send {
    /// Runs exactly one tick and returns the tick index that was executed.
    fn execute_one_tick(&mut self) -> Result<Tick, TickDriverFault>;
}

pub trait TickDiagnosticsSink: Send + Sync {
    fn record(&self, diagnostics: TickDiagnostics);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    AlreadyRunning,
    Busy,
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::AlreadyRunning => write!(f, "scheduler already running"),
            SchedulerError::Busy => write!(f, "scheduler loop is running; cannot drive a tick directly"),
        }
    }
}

impl std::error::Error for SchedulerError {}

struct Shared<D: TickDriver + 'static> {
    driver: Mutex<D>,
    guard: Arc<TickThreadGuard>,
    config: SchedulerConfig,
    diagnostics_sink: Arc<dyn TickDiagnosticsSink>,
    shutdown: AtomicBool,
    running: AtomicBool,
}

impl<D: TickDriver + 'static> Shared<D> {
    fn run_single_tick(&self) -> Result<TickDiagnostics, TickDriverFault> {
        self.guard.assert_tick_thread();
        let start = Instant::now();
        let tick = self.driver.lock().unwrap().execute_one_tick()?;
        let elapsed = start.elapsed();
        let diagnostics = TickDiagnostics {
            tick,
            duration_micros: elapsed.as_micros() as u64,
            overran: elapsed > self.config.tick_interval,
            clamped: false,
        };
        self.diagnostics_sink.record(diagnostics);
        Ok(diagnostics)
    }
}

/// Drives `D` on a single dedicated thread at a fixed cadence, with bounded
/// catch-up when the loop falls behind.
pub struct TickScheduler<D: TickDriver + 'static> {
    shared: Arc<Shared<D>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<D: TickDriver + 'static> TickScheduler<D> {
    pub fn new(
        driver: D,
        guard: Arc<TickThreadGuard>,
        config: SchedulerConfig,
        diagnostics_sink: Arc<dyn TickDiagnosticsSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                driver: Mutex::new(driver),
                guard,
                config,
                diagnostics_sink,
                shutdown: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            stop_tx: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Idempotent: a second call while already running is a no-op.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.shutdown.store(false, Ordering::Release);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        *self.stop_tx.lock().unwrap() = Some(stop_tx);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("tickcore-scheduler".into())
            .spawn(move || {
                shared.guard.capture_current_thread();
                let interval = shared.config.tick_interval;
                let mut next_deadline = Instant::now() + interval;

                loop {
                    if shared.shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let mut now = Instant::now();
                    if now < next_deadline {
                        let remaining = next_deadline - now;
                        if remaining > BUSY_SPIN_THRESHOLD {
                            match stop_rx.recv_timeout(remaining - BUSY_SPIN_THRESHOLD) {
                                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                                Err(RecvTimeoutError::Timeout) => continue,
                            }
                        }

                        // Sub-2ms tail: busy-spin for tick-boundary precision
                        // instead of trusting the OS scheduler's wake-up jitter.
                        loop {
                            if shared.shutdown.load(Ordering::Acquire) {
                                break;
                            }
                            now = Instant::now();
                            if now >= next_deadline {
                                break;
                            }
                            std::hint::spin_loop();
                        }
                        if shared.shutdown.load(Ordering::Acquire) {
                            break;
                        }
                    }

                    let overdue_intervals = 1 + ((now - next_deadline).as_nanos() / interval.as_nanos().max(1)) as u32;
                    let ticks_to_run = overdue_intervals.min(shared.config.max_catch_up_ticks_per_loop);

                    for _ in 0..ticks_to_run {
                        if shared.shutdown.load(Ordering::Acquire) {
                            break;
                        }
                        if shared.run_single_tick().is_err() {
                            shared.shutdown.store(true, Ordering::Release);
                            break;
                        }
                    }

                    if overdue_intervals > ticks_to_run {
                        // Clamp: skip the remaining backlog instead of
                        // spiraling further behind.
                        next_deadline += interval * overdue_intervals;
                        shared.diagnostics_sink.record(TickDiagnostics {
                            tick: 0,
                            duration_micros: 0,
                            overran: false,
                            clamped: true,
                        });
                    } else {
                        next_deadline += interval * ticks_to_run;
                    }
                }

                shared.guard.clear();
                shared.running.store(false, Ordering::Release);
            })
            .expect("failed to spawn tick scheduler thread");

        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Safe from any thread. Cancels between tick boundaries; a tick
    /// already in progress always completes.
    pub fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(tx) = self.stop_tx.lock().unwrap().take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn dispose(&self) {
        self.stop();
    }

    /// Synchronous single-tick entry point for test harnesses. Identical
    /// in semantics to a loop-driven tick. Only usable while the
    /// background loop is not running.
    pub fn execute_one_tick(&self) -> Result<TickDiagnostics, SchedulerError> {
        if self.shared.running.load(Ordering::Acquire) {
            return Err(SchedulerError::Busy);
        }
        if !self.shared.guard.is_tick_thread() {
            self.shared.guard.capture_current_thread();
        }
        self.shared
            .run_single_tick()
            .map_err(|_| SchedulerError::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct CountingDriver {
        tick: u64,
        fail_at: Option<u64>,
    }

    impl TickDriver for CountingDriver {
        fn execute_one_tick(&mut self) -> Result<Tick, TickDriverFault> {
            if self.fail_at == Some(self.tick) {
                return Err(TickDriverFault("boom".into()));
            }
            let t = self.tick;
            self.tick += 1;
            Ok(t)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        count: AtomicU64,
        clamps: AtomicU64,
    }
    impl TickDiagnosticsSink for RecordingSink {
        fn record(&self, diagnostics: TickDiagnostics) {
            self.count.fetch_add(1, Ordering::AcqRel);
            if diagnostics.clamped {
                self.clamps.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    #[test]
    fn execute_one_tick_runs_synchronously_without_loop() {
        let guard = Arc::new(TickThreadGuard::new());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = TickScheduler::new(
            CountingDriver { tick: 0, fail_at: None },
            guard,
            SchedulerConfig::default(),
            sink.clone(),
        );
        let diag = scheduler.execute_one_tick().unwrap();
        assert_eq!(diag.tick, 0);
        assert_eq!(sink.count.load(Ordering::Acquire), 1);
    }

    #[test]
    fn start_is_idempotent() {
        let guard = Arc::new(TickThreadGuard::new());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = TickScheduler::new(
            CountingDriver { tick: 0, fail_at: None },
            guard,
            SchedulerConfig {
                tick_interval: Duration::from_millis(20),
                max_catch_up_ticks_per_loop: 3,
            },
            sink,
        );
        scheduler.start().unwrap();
        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn stop_is_safe_before_start() {
        let guard = Arc::new(TickThreadGuard::new());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = TickScheduler::new(
            CountingDriver { tick: 0, fail_at: None },
            guard,
            SchedulerConfig::default(),
            sink,
        );
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn loop_runs_multiple_ticks_and_stops_cleanly() {
        let guard = Arc::new(TickThreadGuard::new());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = TickScheduler::new(
            CountingDriver { tick: 0, fail_at: None },
            guard,
            SchedulerConfig {
                tick_interval: Duration::from_millis(10),
                max_catch_up_ticks_per_loop: 3,
            },
            sink.clone(),
        );
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(55));
        scheduler.stop();
        assert!(sink.count.load(Ordering::Acquire) >= 2);
    }
}
