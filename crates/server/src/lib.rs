//! Authoritative tick core orchestrator.
//!
//! Wires every tickcore-* collaborator into one `GameServer`: session
//! bookkeeping, authoritative command ingress, the combat state/gating/
//! resolution/application pipeline, post-tick replication capture and
//! bounded outbound delivery, the persistence write queue, and the tick
//! scheduler that drives it all on a dedicated thread.
//!
//! Nothing here does transport I/O. A host process owns sockets, decodes
//! wire bytes into `submit_command` calls, and drains `dequeue_outbound_snapshot`/
//! `dequeue_persistence_write` onto its own connections.

#![deny(unsafe_code)]

mod combat_participant;
mod driver;
mod registry;
mod replication_state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tickcore_combat::{CombatOutcomeApplication, CombatStateAuthority};
use tickcore_diagnostics::HookLiveness;
use tickcore_ingress::{AuthoritativeCommandIngress, EnqueueOutcome, IngressConfig};
use tickcore_persistence::{PersistenceQueueConfig, PersistenceWriteQueue, PersistenceWriteRequest};
use tickcore_replication::{
    ActiveSessionIndex, BoundedOutboundSnapshotQueue, OutboundQueueConfig,
    ReplicationEligibilityGate, ReplicationSnapshotSink, ReplicationStateReader,
    SerializedSnapshot, SnapshotCapture, SnapshotCaptureConfig, SnapshotEligibilityView,
};
use tickcore_scheduler::{SchedulerConfig, SchedulerError, TickScheduler};
use tickcore_sim::{
    EntityHandle, NamespaceGuard, PlayerId, PostTickView, PreTickView, PhaseHook, SessionId,
    SimulationCore, Tick, TickThreadGuard,
};

pub use combat_participant::CombatTickParticipant;
pub use driver::{GameServerDriver, TracingDiagnosticsSink};
pub use registry::SessionRegistry;
pub use replication_state::CombatStateReplicationReader;

/// `PhaseHook` only needs `&self`, but `SimulationCore::register_phase_hook`
/// takes ownership as a `Box`; this forwards to a shared `SnapshotCapture`
/// so the host can still read its counters after registration.
struct CaptureHook(Arc<SnapshotCapture>);

impl PhaseHook for CaptureHook {
    fn on_pre_tick(&self, view: &PreTickView<'_>) {
        self.0.on_pre_tick(view);
    }

    fn on_post_tick(&self, view: &PostTickView<'_>) {
        self.0.on_post_tick(view);
    }
}

/// Every bounded-queue and cadence knob the orchestrator wires at boot.
/// Named for the thing it all protects against: an overloaded server
/// degrading by dropping the oldest excess work instead of falling behind
/// or running out of memory.
#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    pub ingress: IngressConfig,
    pub outbound: OutboundQueueConfig,
    pub capture: SnapshotCaptureConfig,
    pub persistence: PersistenceQueueConfig,
    pub scheduler: SchedulerConfig,
    /// Upper bound on commands a single tick's combat participant drains
    /// from ingress, independent of any one session's own mailbox cap.
    pub max_commands_per_tick: usize,
    pub fixed_delta: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            ingress: IngressConfig {
                max_inbound_commands_per_session: 64,
                max_queued_bytes_per_session: 16 * 1024,
            },
            outbound: OutboundQueueConfig {
                max_outbound_snapshots_per_session: 8,
                max_queued_bytes_per_session: 64 * 1024,
            },
            capture: SnapshotCaptureConfig {
                entities_per_slice: 256,
                max_slices_per_tick: 4,
            },
            persistence: PersistenceQueueConfig {
                max_writes_per_player: 32,
                max_bytes_per_player: 256 * 1024,
                max_writes_global: 4096,
                max_bytes_global: 16 * 1024 * 1024,
            },
            scheduler: SchedulerConfig {
                tick_interval: Duration::from_millis(50),
                max_catch_up_ticks_per_loop: 3,
            },
            max_commands_per_tick: 512,
            fixed_delta: 1.0 / 20.0,
        }
    }
}

/// The authoritative tick core: every subsystem a host needs to accept
/// sessions, ingest commands, and drain replication/persistence output,
/// plus the scheduler thread that advances the tick loop.
pub struct GameServer {
    sessions: Arc<SessionRegistry>,
    ingress: Arc<Mutex<AuthoritativeCommandIngress>>,
    outbound: Arc<BoundedOutboundSnapshotQueue>,
    persistence: Arc<PersistenceWriteQueue>,
    capture: Arc<SnapshotCapture>,
    hook_liveness: Arc<HookLiveness>,
    current_tick: Arc<AtomicU64>,
    scheduler: TickScheduler<GameServerDriver>,
}

impl GameServer {
    pub fn new(config: BackpressureConfig) -> Self {
        let mut namespace_guard = NamespaceGuard::new();
        namespace_guard.assert_canonical::<SessionId>("session");
        namespace_guard.assert_canonical::<PlayerId>("player");
        namespace_guard.assert_canonical::<EntityHandle>("entity");

        let guard = Arc::new(TickThreadGuard::new());
        let sessions = Arc::new(SessionRegistry::new());
        let ingress = Arc::new(Mutex::new(AuthoritativeCommandIngress::new(config.ingress)));
        let authority = Arc::new(Mutex::new(CombatStateAuthority::new(Arc::clone(&guard))));
        let application = Arc::new(Mutex::new(CombatOutcomeApplication::new()));
        let outbound = Arc::new(BoundedOutboundSnapshotQueue::new(config.outbound));
        let persistence = Arc::new(PersistenceWriteQueue::new(config.persistence));
        let hook_liveness = Arc::new(HookLiveness::new());
        let current_tick = Arc::new(AtomicU64::new(0));

        let state_reader: Arc<dyn ReplicationStateReader> =
            Arc::new(CombatStateReplicationReader::new(Arc::clone(&authority)));
        let eligibility: Arc<dyn ReplicationEligibilityGate> = Arc::clone(&sessions) as _;
        let active_sessions: Arc<dyn ActiveSessionIndex> = Arc::clone(&sessions) as _;
        let snapshot_eligibility: Arc<dyn SnapshotEligibilityView> = Arc::clone(&sessions) as _;
        let sink: Arc<dyn ReplicationSnapshotSink> = Arc::clone(&outbound) as _;
        let capture = Arc::new(SnapshotCapture::new(
            config.capture,
            state_reader,
            eligibility,
            active_sessions,
            snapshot_eligibility,
            sink,
        ));

        let combat_participant = CombatTickParticipant::new(
            Arc::clone(&ingress),
            Arc::clone(&authority),
            Arc::clone(&application),
            Arc::clone(&sessions),
            config.max_commands_per_tick,
        );

        let mut core = SimulationCore::new(config.fixed_delta);
        core.register_participant(Box::new(combat_participant));
        core.register_phase_hook(Box::new(CaptureHook(Arc::clone(&capture))));

        let driver = GameServerDriver::new(
            core,
            Arc::clone(&sessions),
            Arc::clone(&guard),
            Arc::clone(&hook_liveness),
            Arc::clone(&current_tick),
        );
        let scheduler = TickScheduler::new(driver, guard, config.scheduler, Arc::new(TracingDiagnosticsSink));

        Self {
            sessions,
            ingress,
            outbound,
            persistence,
            capture,
            hook_liveness,
            current_tick,
            scheduler,
        }
    }

    /// Registers a newly connected session against both the session
    /// registry and ingress, so its first `submit_command` is accepted.
    pub fn accept_session(&self, session: SessionId, player: PlayerId) {
        self.sessions.accept_session(session, player);
        self.ingress.lock().unwrap().register_session(session);
    }

    /// Attaches an entity the session's commands should be attributed to.
    /// Called once a player's character has spawned.
    pub fn attach_entity(&self, session: SessionId, entity: EntityHandle) {
        self.sessions.attach_entity(session, entity);
    }

    /// Marks a session disconnected without forgetting its entity
    /// ownership or draining its ingress mailbox — a reconnect within the
    /// session's grace window picks both back up.
    pub fn disconnect_session(&self, session: SessionId) {
        self.sessions.disconnect_session(session);
    }

    /// Fully tears a session down: drops its ingress mailbox and queued
    /// outbound snapshots and forgets it entirely. Use once a session is
    /// known never to reconnect (final logout), not on a transient drop.
    pub fn remove_session(&self, session: SessionId) {
        self.ingress.lock().unwrap().teardown_session(session);
        self.outbound.teardown_session(session);
        self.sessions.teardown_session(session);
    }

    pub fn submit_command(
        &self,
        session: SessionId,
        payload: &[u8],
        command_type: u32,
        submit_tick: Tick,
    ) -> EnqueueOutcome {
        self.ingress
            .lock()
            .unwrap()
            .try_enqueue(session, payload, command_type, submit_tick)
    }

    /// Pops the oldest queued replication delta for `session`, if any.
    pub fn dequeue_outbound_snapshot(&self, session: SessionId) -> Option<SerializedSnapshot> {
        self.outbound.dequeue_for_send(session)
    }

    /// A checkpoint request only logs (see `combat_participant`); player
    /// saves are instead driven explicitly by whatever host logic decides
    /// a player is due for one.
    pub fn enqueue_persistence_write(&self, request: PersistenceWriteRequest) {
        self.persistence.enqueue(request);
    }

    pub fn dequeue_persistence_write(&self) -> Option<PersistenceWriteRequest> {
        self.persistence.dequeue()
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick.load(Ordering::Acquire)
    }

    pub fn hook_liveness(&self) -> &HookLiveness {
        &self.hook_liveness
    }

    pub fn capture_counters(&self) -> tickcore_replication::CaptureCountersSnapshot {
        self.capture.counters().snapshot()
    }

    pub fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler.start()
    }

    pub fn stop(&self) {
        self.scheduler.stop()
    }

    /// Synchronous single-tick entry point for tests and tools; fails if
    /// the background loop is already running.
    pub fn execute_one_tick(&self) -> Result<tickcore_diagnostics::TickDiagnostics, SchedulerError> {
        self.scheduler.execute_one_tick()
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_session_then_submit_command_is_accepted() {
        let server = GameServer::new(BackpressureConfig::default());
        let session = SessionId::new(1);
        server.accept_session(session, PlayerId::new(1));
        server.attach_entity(session, EntityHandle::new(1));

        let outcome = server.submit_command(session, b"payload", 3, 0);
        assert!(matches!(outcome, EnqueueOutcome::Accepted(_)));
    }

    #[test]
    fn submit_command_for_unknown_session_is_rejected() {
        let server = GameServer::new(BackpressureConfig::default());
        let outcome = server.submit_command(SessionId::new(99), b"payload", 3, 0);
        assert!(matches!(outcome, EnqueueOutcome::Rejected(_)));
    }

    #[test]
    fn one_tick_runs_combat_pipeline_and_advances_tick_counter() {
        let server = GameServer::new(BackpressureConfig::default());
        let session = SessionId::new(1);
        server.accept_session(session, PlayerId::new(1));
        server.attach_entity(session, EntityHandle::new(7));
        server.submit_command(session, b"payload", 3 /* Movement */, 0);

        server.execute_one_tick().unwrap();
        assert_eq!(server.current_tick(), 0);
    }

    #[test]
    fn remove_session_drops_its_queues() {
        let server = GameServer::new(BackpressureConfig::default());
        let session = SessionId::new(1);
        server.accept_session(session, PlayerId::new(1));
        server.remove_session(session);

        let outcome = server.submit_command(session, b"payload", 3, 0);
        assert!(matches!(outcome, EnqueueOutcome::Rejected(_)));
    }
}
