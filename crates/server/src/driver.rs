//! Drives `SimulationCore` as a `tickcore_scheduler::TickDriver`, and a
//! `tracing`-backed diagnostics sink for the scheduler to report into.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tickcore_diagnostics::{HookLiveness, TickDiagnostics};
use tickcore_scheduler::{TickDiagnosticsSink, TickDriver, TickDriverFault};
use tickcore_sim::{SimulationCore, SimulationEntityIndex, Tick, TickThreadGuard};

use crate::registry::SessionRegistry;

/// Wraps the simulation core plus whatever it needs each tick: the
/// deterministic entity index and the shared tick-thread guard, whose
/// phase is flipped around the call so mutation-gated collaborators (none,
/// currently — see `DESIGN.md`) see the right phase if one is ever added.
pub struct GameServerDriver {
    core: SimulationCore,
    entities: Arc<SessionRegistry>,
    guard: Arc<TickThreadGuard>,
    hook_liveness: Arc<HookLiveness>,
    current_tick: Arc<AtomicU64>,
}

impl GameServerDriver {
    pub fn new(
        core: SimulationCore,
        entities: Arc<SessionRegistry>,
        guard: Arc<TickThreadGuard>,
        hook_liveness: Arc<HookLiveness>,
        current_tick: Arc<AtomicU64>,
    ) -> Self {
        Self {
            core,
            entities,
            guard,
            hook_liveness,
            current_tick,
        }
    }
}

impl TickDriver for GameServerDriver {
    fn execute_one_tick(&mut self) -> Result<Tick, TickDriverFault> {
        let tick = self.core.tick();
        self.guard.set_phase(tickcore_sim::TickPhase::Execution);
        let result = self.core.run_tick(tick, self.entities.as_ref() as &dyn SimulationEntityIndex);
        self.guard.set_phase(tickcore_sim::TickPhase::Idle);

        let report = result.map_err(|fault| TickDriverFault(format!("{fault}")))?;
        self.hook_liveness.record_execution("combat_tick_participant", tick);
        self.current_tick.store(report.tick, Ordering::Release);
        Ok(report.tick)
    }
}

/// Logs every tick's diagnostics instead of forwarding them anywhere — the
/// scheduler's catch-up clamp events are the main thing worth surfacing
/// this way, since a repeatedly overrunning tick otherwise fails silently.
pub struct TracingDiagnosticsSink;

impl TickDiagnosticsSink for TracingDiagnosticsSink {
    fn record(&self, diagnostics: TickDiagnostics) {
        if diagnostics.clamped {
            tracing::warn!("tick scheduler clamped catch-up backlog");
        } else if diagnostics.overran {
            tracing::warn!(
                tick = diagnostics.tick,
                duration_micros = diagnostics.duration_micros,
                "tick overran its interval"
            );
        } else {
            tracing::trace!(
                tick = diagnostics.tick,
                duration_micros = diagnostics.duration_micros,
                "tick completed"
            );
        }
    }
}
