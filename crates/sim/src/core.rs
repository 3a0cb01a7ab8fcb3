//! Simulation core (C4): registers participants and phase hooks with
//! deterministic ordering and drives the three tick phases.

use std::sync::Mutex;

use crate::effect::{EffectBuffer, DEFAULT_CAPACITY};
use crate::gate::EligibilityGateSet;
use crate::handle::EntityHandle;

pub type Tick = u64;

/// `ISimulationEntityIndex`: deterministically ordered entity enumeration,
/// owned by an external collaborator.
pub trait SimulationEntityIndex: Send + Sync {
    fn snapshot_entities_deterministic(&self) -> Vec<EntityHandle>;
}

/// Read-only view handed to phase hooks at the Pre-Tick boundary.
pub struct PreTickView<'a> {
    pub tick_index: Tick,
    pub eligible: &'a [EntityHandle],
}

/// Read-only view handed to phase hooks at the Post-Tick boundary.
pub struct PostTickView<'a> {
    pub tick_index: Tick,
    pub eligible: &'a [EntityHandle],
}

/// Context passed to each simulation participant during Simulation
/// Execution. The buffer handle is tick-scoped: it is only valid for the
/// duration of the current `run_tick` call.
pub struct SimulationTickContext<'a> {
    pub tick_index: Tick,
    pub fixed_delta: f64,
    effects: &'a Mutex<EffectBuffer>,
}

impl<'a> SimulationTickContext<'a> {
    pub fn buffer_effect(
        &self,
        command: crate::effect::EffectCommand,
    ) -> Result<(), crate::effect::EffectBufferError> {
        self.effects.lock().unwrap().buffer(command)
    }
}

/// A simulation participant, run once per tick over the eligible-entity
/// view. Participants MUST NOT mutate authoritative state directly — only
/// through `SimulationTickContext::buffer_effect`.
pub trait SimulationParticipant: Send + Sync {
    /// Ascending sort key; ties break by registration sequence.
    fn order_key(&self) -> i64 {
        0
    }

    fn step(&self, ctx: &SimulationTickContext<'_>, eligible: &[EntityHandle]);
}

/// A phase hook invoked at the Pre-Tick and Post-Tick boundaries.
pub trait PhaseHook: Send + Sync {
    fn order_key(&self) -> i64 {
        0
    }

    fn on_pre_tick(&self, _view: &PreTickView<'_>) {}
    fn on_post_tick(&self, _view: &PostTickView<'_>) {}
}

/// Fatal errors raised by the simulation core. These terminate the tick and
/// propagate to the runtime host; the host must not continue the current
/// tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFault {
    /// Pre-tick and post-tick eligibility snapshots disagreed for at least
    /// one entity.
    EligibilityMutatedMidTick,
    /// `run_tick` was called with a tick index that does not match the
    /// core's current tick.
    TickMismatch { expected: Tick, got: Tick },
}

impl std::fmt::Display for TickFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickFault::EligibilityMutatedMidTick => write!(f, "EligibilityMutatedMidTick"),
            TickFault::TickMismatch { expected, got } => {
                write!(f, "TickMismatch: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for TickFault {}

/// Outcome of one successful `run_tick` call, useful for diagnostics.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: Tick,
    pub entity_count: usize,
    pub eligible_count: usize,
    pub participants_run: usize,
    pub effects_committed: usize,
}

struct Registered<T: ?Sized> {
    order_key: i64,
    sequence: u64,
    value: Box<T>,
}

/// Drives the three-phase tick: Pre-Tick Gate Evaluation, Simulation
/// Execution, Post-Tick Finalization.
pub struct SimulationCore {
    gates: EligibilityGateSet,
    participants: Vec<Registered<dyn SimulationParticipant>>,
    hooks: Vec<Registered<dyn PhaseHook>>,
    next_sequence: u64,
    effects: Mutex<EffectBuffer>,
    fixed_delta: f64,
    tick: Tick,
}

impl SimulationCore {
    pub fn new(fixed_delta: f64) -> Self {
        Self {
            gates: EligibilityGateSet::new(),
            participants: Vec::new(),
            hooks: Vec::new(),
            next_sequence: 0,
            effects: Mutex::new(EffectBuffer::new(DEFAULT_CAPACITY)),
            fixed_delta,
            tick: 0,
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn gates_mut(&mut self) -> &mut EligibilityGateSet {
        &mut self.gates
    }

    pub fn register_participant(&mut self, participant: Box<dyn SimulationParticipant>) {
        let order_key = participant.order_key();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.participants.push(Registered {
            order_key,
            sequence,
            value: participant,
        });
        self.participants
            .sort_by_key(|r| (r.order_key, r.sequence));
    }

    pub fn register_phase_hook(&mut self, hook: Box<dyn PhaseHook>) {
        let order_key = hook.order_key();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.hooks.push(Registered {
            order_key,
            sequence,
            value: hook,
        });
        self.hooks.sort_by_key(|r| (r.order_key, r.sequence));
    }

    /// Run exactly one tick. `tick` must equal `self.tick()` — the same
    /// explicit-tick precondition the rest of the core uses everywhere a
    /// caller could otherwise silently skip or replay a tick.
    pub fn run_tick(
        &mut self,
        tick: Tick,
        entity_index: &dyn SimulationEntityIndex,
    ) -> Result<TickReport, TickFault> {
        if tick != self.tick {
            return Err(TickFault::TickMismatch {
                expected: self.tick,
                got: tick,
            });
        }

        let entities = entity_index.snapshot_entities_deterministic();

        // Phase 1: Pre-Tick Gate Evaluation.
        let pre_map = self.gates.evaluate_all(&entities);
        let eligible: Vec<EntityHandle> = pre_map
            .iter()
            .filter(|(_, ok)| *ok)
            .map(|(e, _)| *e)
            .collect();

        for hook in &self.hooks {
            hook.value.on_pre_tick(&PreTickView {
                tick_index: tick,
                eligible: &eligible,
            });
        }

        // Phase 2: Simulation Execution.
        self.effects.get_mut().unwrap().open_window();
        let ctx = SimulationTickContext {
            tick_index: tick,
            fixed_delta: self.fixed_delta,
            effects: &self.effects,
        };
        for participant in &self.participants {
            participant.value.step(&ctx, &eligible);
        }

        // Phase 3: Post-Tick Finalization.
        let post_map = self.gates.evaluate_all(&entities);
        if post_map != pre_map {
            self.effects.get_mut().unwrap().discard();
            return Err(TickFault::EligibilityMutatedMidTick);
        }

        let effects_committed = self.effects.get_mut().unwrap().len();
        self.effects.get_mut().unwrap().commit();

        for hook in &self.hooks {
            hook.value.on_post_tick(&PostTickView {
                tick_index: tick,
                eligible: &eligible,
            });
        }

        self.tick += 1;

        Ok(TickReport {
            tick,
            entity_count: entities.len(),
            eligible_count: eligible.len(),
            participants_run: self.participants.len(),
            effects_committed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectCommand;
    use crate::gate::EligibilityGate;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Arc;

    struct FixedIndex(Vec<EntityHandle>);
    impl SimulationEntityIndex for FixedIndex {
        fn snapshot_entities_deterministic(&self) -> Vec<EntityHandle> {
            self.0.clone()
        }
    }

    struct AllowAll;
    impl EligibilityGate for AllowAll {
        fn is_eligible(&self, _entity: EntityHandle) -> bool {
            true
        }
    }

    struct RecordingParticipant {
        order_key: i64,
        log: Arc<Mutex<Vec<i64>>>,
    }
    impl SimulationParticipant for RecordingParticipant {
        fn order_key(&self) -> i64 {
            self.order_key
        }
        fn step(&self, _ctx: &SimulationTickContext<'_>, _eligible: &[EntityHandle]) {
            self.log.lock().unwrap().push(self.order_key);
        }
    }

    #[test]
    fn participants_run_in_order_key_then_sequence() {
        let mut core = SimulationCore::new(1.0 / 60.0);
        let log = Arc::new(Mutex::new(Vec::new()));
        core.register_participant(Box::new(RecordingParticipant {
            order_key: 5,
            log: log.clone(),
        }));
        core.register_participant(Box::new(RecordingParticipant {
            order_key: 1,
            log: log.clone(),
        }));
        core.register_participant(Box::new(RecordingParticipant {
            order_key: 1,
            log: log.clone(),
        }));
        let index = FixedIndex(vec![]);
        core.run_tick(0, &index).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 1, 5]);
    }

    #[test]
    fn tick_mismatch_is_rejected() {
        let mut core = SimulationCore::new(1.0 / 60.0);
        let index = FixedIndex(vec![]);
        let result = core.run_tick(7, &index);
        assert_eq!(
            result.unwrap_err(),
            TickFault::TickMismatch {
                expected: 0,
                got: 7
            }
        );
    }

    #[test]
    fn mutation_only_through_effect_buffer_is_observed_after_commit() {
        let mut core = SimulationCore::new(1.0 / 60.0);
        let flag = Arc::new(AtomicBool::new(false));
        struct Flipper(Arc<AtomicBool>);
        impl SimulationParticipant for Flipper {
            fn step(&self, ctx: &SimulationTickContext<'_>, _eligible: &[EntityHandle]) {
                let flag = self.0.clone();
                ctx.buffer_effect(EffectCommand::CombatOutcomeCommit(Box::new(move || {
                    flag.store(true, Ordering::Release);
                })))
                .unwrap();
                // Not yet applied: commit happens after Simulation Execution.
                assert!(!self.0.load(Ordering::Acquire));
            }
        }
        core.register_participant(Box::new(Flipper(flag.clone())));
        let index = FixedIndex(vec![]);
        core.run_tick(0, &index).unwrap();
        assert!(flag.load(Ordering::Acquire));
    }

    #[test]
    fn eligibility_mutated_mid_tick_is_fatal() {
        struct Toggle(AtomicI64);
        impl EligibilityGate for Toggle {
            fn is_eligible(&self, _entity: EntityHandle) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst) % 2 == 0
            }
        }
        let mut core = SimulationCore::new(1.0 / 60.0);
        core.gates_mut().register(Box::new(Toggle(AtomicI64::new(0))));
        let index = FixedIndex(vec![EntityHandle::new(1)]);
        let result = core.run_tick(0, &index);
        assert_eq!(result.unwrap_err(), TickFault::EligibilityMutatedMidTick);
    }

    #[test]
    fn hooks_see_eligible_view_at_each_boundary() {
        let mut core = SimulationCore::new(1.0 / 60.0);
        core.gates_mut().register(Box::new(AllowAll));
        let pre_seen = Arc::new(Mutex::new(Vec::new()));
        let post_seen = Arc::new(Mutex::new(Vec::new()));
        struct Recorder {
            pre: Arc<Mutex<Vec<usize>>>,
            post: Arc<Mutex<Vec<usize>>>,
        }
        impl PhaseHook for Recorder {
            fn on_pre_tick(&self, view: &PreTickView<'_>) {
                self.pre.lock().unwrap().push(view.eligible.len());
            }
            fn on_post_tick(&self, view: &PostTickView<'_>) {
                self.post.lock().unwrap().push(view.eligible.len());
            }
        }
        core.register_phase_hook(Box::new(Recorder {
            pre: pre_seen.clone(),
            post: post_seen.clone(),
        }));
        let index = FixedIndex(vec![EntityHandle::new(1), EntityHandle::new(2)]);
        core.run_tick(0, &index).unwrap();
        assert_eq!(*pre_seen.lock().unwrap(), vec![2]);
        assert_eq!(*post_seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn tick_advances_only_on_success() {
        let mut core = SimulationCore::new(1.0 / 60.0);
        let index = FixedIndex(vec![]);
        assert_eq!(core.tick(), 0);
        core.run_tick(0, &index).unwrap();
        assert_eq!(core.tick(), 1);
        core.run_tick(1, &index).unwrap();
        assert_eq!(core.tick(), 2);
    }
}
