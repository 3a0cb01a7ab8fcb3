//! Replication snapshot capture (C10).
//!
//! Registered as a phase hook: pre-tick disables captures, post-tick
//! enables them and drives one capture pass per snapshot-eligible session.
//! Large entity sets capture across bounded slices instead of blocking the
//! tick on a single session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tickcore_sim::{EntityHandle, PhaseHook, PostTickView, PreTickView, SessionId, Tick};

use crate::ReplicatedEntitySnapshot;

/// Returned when a capture is requested outside the post-tick window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOutsidePostTick;

impl std::fmt::Display for CaptureOutsidePostTick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CaptureOutsidePostTick")
    }
}

impl std::error::Error for CaptureOutsidePostTick {}

/// `IReplicationStateReader`: reads the committed per-entity fingerprint.
pub trait ReplicationStateReader: Send + Sync {
    fn read_committed_state(&self, entity: EntityHandle) -> u64;
}

/// `IReplicationEligibilityGate`: whether `entity` is visible to `session`.
pub trait ReplicationEligibilityGate: Send + Sync {
    fn is_entity_replication_eligible(&self, session: SessionId, entity: EntityHandle) -> bool;
}

/// `IActiveSessionIndex`: deterministically ordered active sessions.
pub trait ActiveSessionIndex: Send + Sync {
    fn snapshot_sessions_deterministic(&self) -> Vec<SessionId>;
}

/// `ISnapshotEligibilityView`: whether a session currently wants snapshots
/// (e.g. still loading, or spectating).
pub trait SnapshotEligibilityView: Send + Sync {
    fn is_snapshot_eligible(&self, session: SessionId) -> bool;
}

/// One finished capture, handed to whatever enqueues it (`IReplicationSnapshotQueue`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReplicationSnapshot {
    pub authoritative_tick: Tick,
    pub entities: Vec<ReplicatedEntitySnapshot>,
}

/// `IReplicationSnapshotQueue`: receives one finished snapshot per
/// eligible session per tick.
pub trait ReplicationSnapshotSink: Send + Sync {
    fn enqueue(&self, session: SessionId, snapshot: ClientReplicationSnapshot);
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotCaptureConfig {
    pub entities_per_slice: usize,
    pub max_slices_per_tick: usize,
}

/// Cursor-based slice job: `execute_slice` advances through the eligible
/// entity list, returns `true` once exhausted. No suspension primitives —
/// the driver decides whether and how often to call it.
struct TimeSlicedCaptureJob {
    session: SessionId,
    tick: Tick,
    entities: Vec<EntityHandle>,
    cursor: usize,
    collected: Vec<ReplicatedEntitySnapshot>,
}

impl TimeSlicedCaptureJob {
    fn new(session: SessionId, tick: Tick, entities: Vec<EntityHandle>) -> Self {
        Self {
            session,
            tick,
            entities,
            cursor: 0,
            collected: Vec::new(),
        }
    }

    fn execute_slice(&mut self, entities_per_slice: usize, reader: &dyn ReplicationStateReader) -> bool {
        let end = (self.cursor + entities_per_slice).min(self.entities.len());
        for &entity in &self.entities[self.cursor..end] {
            self.collected.push(ReplicatedEntitySnapshot {
                entity,
                state_fingerprint: reader.read_committed_state(entity).to_string(),
            });
        }
        self.cursor = end;
        self.cursor >= self.entities.len()
    }

    fn into_snapshot(self) -> ClientReplicationSnapshot {
        ClientReplicationSnapshot {
            authoritative_tick: self.tick,
            entities: self.collected,
        }
    }
}

/// Capture counters: how many sessions were captured synchronously,
/// sliced, or dropped for failing to finish within the per-tick slice
/// budget (the conservative "drop rather than straddle ticks" choice).
#[derive(Default)]
pub struct CaptureCounters {
    pub synchronous: AtomicU64,
    pub sliced: AtomicU64,
    pub dropped_over_budget: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureCountersSnapshot {
    pub synchronous: u64,
    pub sliced: u64,
    pub dropped_over_budget: u64,
}

impl CaptureCounters {
    pub fn snapshot(&self) -> CaptureCountersSnapshot {
        CaptureCountersSnapshot {
            synchronous: self.synchronous.load(Ordering::Acquire),
            sliced: self.sliced.load(Ordering::Acquire),
            dropped_over_budget: self.dropped_over_budget.load(Ordering::Acquire),
        }
    }
}

pub struct SnapshotCapture {
    enabled: AtomicBool,
    config: SnapshotCaptureConfig,
    state_reader: Arc<dyn ReplicationStateReader>,
    eligibility: Arc<dyn ReplicationEligibilityGate>,
    sessions: Arc<dyn ActiveSessionIndex>,
    snapshot_eligibility: Arc<dyn SnapshotEligibilityView>,
    sink: Arc<dyn ReplicationSnapshotSink>,
    counters: CaptureCounters,
}

impl SnapshotCapture {
    pub fn new(
        config: SnapshotCaptureConfig,
        state_reader: Arc<dyn ReplicationStateReader>,
        eligibility: Arc<dyn ReplicationEligibilityGate>,
        sessions: Arc<dyn ActiveSessionIndex>,
        snapshot_eligibility: Arc<dyn SnapshotEligibilityView>,
        sink: Arc<dyn ReplicationSnapshotSink>,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            config,
            state_reader,
            eligibility,
            sessions,
            snapshot_eligibility,
            sink,
            counters: CaptureCounters::default(),
        }
    }

    pub fn counters(&self) -> &CaptureCounters {
        &self.counters
    }

    /// Captures one session's eligible-entity snapshot and enqueues it.
    /// `entities` is the tick's authoritative eligible-entity view, already
    /// filtered down by the caller's own gameplay eligibility rules.
    pub fn capture_for_session(
        &self,
        session: SessionId,
        tick: Tick,
        entities: &[EntityHandle],
    ) -> Result<(), CaptureOutsidePostTick> {
        if !self.enabled.load(Ordering::Acquire) {
            return Err(CaptureOutsidePostTick);
        }

        let mut visible: Vec<EntityHandle> = entities
            .iter()
            .copied()
            .filter(|&e| self.eligibility.is_entity_replication_eligible(session, e))
            .collect();
        visible.sort_by_key(|e| e.value());

        if visible.len() <= self.config.entities_per_slice {
            let entities = visible
                .into_iter()
                .map(|entity| ReplicatedEntitySnapshot {
                    entity,
                    state_fingerprint: self.state_reader.read_committed_state(entity).to_string(),
                })
                .collect();
            self.counters.synchronous.fetch_add(1, Ordering::AcqRel);
            self.sink.enqueue(
                session,
                ClientReplicationSnapshot {
                    authoritative_tick: tick,
                    entities,
                },
            );
            return Ok(());
        }

        let mut job = TimeSlicedCaptureJob::new(session, tick, visible);
        let mut finished = false;
        for _ in 0..self.config.max_slices_per_tick {
            if job.execute_slice(self.config.entities_per_slice, self.state_reader.as_ref()) {
                finished = true;
                break;
            }
        }

        if finished {
            self.counters.sliced.fetch_add(1, Ordering::AcqRel);
            self.sink.enqueue(session, job.into_snapshot());
        } else {
            // Conservative choice: a work item that straddles tick T/T+1 is
            // dropped rather than carried over, so tick T+1 never observes
            // a partially stale session snapshot.
            self.counters.dropped_over_budget.fetch_add(1, Ordering::AcqRel);
        }

        Ok(())
    }
}

impl PhaseHook for SnapshotCapture {
    fn on_pre_tick(&self, _view: &PreTickView<'_>) {
        self.enabled.store(false, Ordering::Release);
    }

    fn on_post_tick(&self, view: &PostTickView<'_>) {
        self.enabled.store(true, Ordering::Release);
        for session in self.sessions.snapshot_sessions_deterministic() {
            if !self.snapshot_eligibility.is_snapshot_eligible(session) {
                continue;
            }
            let _ = self.capture_for_session(session, view.tick_index, view.eligible);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedReader;
    impl ReplicationStateReader for FixedReader {
        fn read_committed_state(&self, entity: EntityHandle) -> u64 {
            entity.value() as u64 * 10
        }
    }

    struct AllowAll;
    impl ReplicationEligibilityGate for AllowAll {
        fn is_entity_replication_eligible(&self, _session: SessionId, _entity: EntityHandle) -> bool {
            true
        }
    }

    struct OneSession(SessionId);
    impl ActiveSessionIndex for OneSession {
        fn snapshot_sessions_deterministic(&self) -> Vec<SessionId> {
            vec![self.0]
        }
    }

    struct AlwaysEligible;
    impl SnapshotEligibilityView for AlwaysEligible {
        fn is_snapshot_eligible(&self, _session: SessionId) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(SessionId, ClientReplicationSnapshot)>>);
    impl ReplicationSnapshotSink for RecordingSink {
        fn enqueue(&self, session: SessionId, snapshot: ClientReplicationSnapshot) {
            self.0.lock().unwrap().push((session, snapshot));
        }
    }

    fn capture(config: SnapshotCaptureConfig, sink: Arc<RecordingSink>) -> SnapshotCapture {
        SnapshotCapture::new(
            config,
            Arc::new(FixedReader),
            Arc::new(AllowAll),
            Arc::new(OneSession(SessionId::new(1))),
            Arc::new(AlwaysEligible),
            sink,
        )
    }

    #[test]
    fn capture_outside_post_tick_is_rejected() {
        let c = capture(
            SnapshotCaptureConfig {
                entities_per_slice: 10,
                max_slices_per_tick: 1,
            },
            Arc::new(RecordingSink::default()),
        );
        let result = c.capture_for_session(SessionId::new(1), 2, &[EntityHandle::new(5)]);
        assert_eq!(result, Err(CaptureOutsidePostTick));
    }

    #[test]
    fn post_tick_hook_enumerates_sessions_and_enqueues_sorted_entities() {
        let sink = Arc::new(RecordingSink::default());
        let c = capture(
            SnapshotCaptureConfig {
                entities_per_slice: 10,
                max_slices_per_tick: 1,
            },
            sink.clone(),
        );
        c.on_post_tick(&PostTickView {
            tick_index: 10,
            eligible: &[EntityHandle::new(11), EntityHandle::new(5)],
        });
        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        let (_, snapshot) = &recorded[0];
        assert_eq!(snapshot.entities[0].entity, EntityHandle::new(5));
        assert_eq!(snapshot.entities[1].entity, EntityHandle::new(11));
    }

    #[test]
    fn sliced_capture_finishes_within_budget() {
        let sink = Arc::new(RecordingSink::default());
        let c = capture(
            SnapshotCaptureConfig {
                entities_per_slice: 2,
                max_slices_per_tick: 3,
            },
            sink.clone(),
        );
        c.on_post_tick(&PostTickView {
            tick_index: 1,
            eligible: &[
                EntityHandle::new(1),
                EntityHandle::new(2),
                EntityHandle::new(3),
                EntityHandle::new(4),
            ],
        });
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert_eq!(c.counters().snapshot().sliced, 1);
    }

    #[test]
    fn sliced_capture_over_budget_is_dropped_not_carried_over() {
        let sink = Arc::new(RecordingSink::default());
        let c = capture(
            SnapshotCaptureConfig {
                entities_per_slice: 1,
                max_slices_per_tick: 1,
            },
            sink.clone(),
        );
        c.on_post_tick(&PostTickView {
            tick_index: 1,
            eligible: &[EntityHandle::new(1), EntityHandle::new(2)],
        });
        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(c.counters().snapshot().dropped_over_budget, 1);
    }
}
