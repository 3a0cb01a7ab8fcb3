//! Combat outcome application (C8): applies one resolved batch per tick
//! with idempotence, strict apply order, and deterministic event emission.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tickcore_sim::{fnv64_mix, fnv64_str, Tick};

use crate::authority::CombatStateAuthority;
use crate::error::CombatFault;
use crate::types::{
    CheckpointRequester, CombatEvent, CombatEventSink, CombatEventType, CombatOutcomeBatch,
    CombatState, CombatStateChange, DamageOutcome, IntentResult, MitigationOutcome, ResultStatus,
};

/// Per-tick applied-payload-id set, pruned once stale.
const APPLIED_SET_CAP: usize = 4096;
/// Applied-sets older than `current_tick - PRUNE_HORIZON` are dropped.
const PRUNE_HORIZON: Tick = 4;

struct AppliedSetForTick {
    ids: HashSet<u64>,
    overflow: bool,
}

impl AppliedSetForTick {
    fn new() -> Self {
        Self {
            ids: HashSet::new(),
            overflow: false,
        }
    }

    /// Returns `true` if this is the first time `id` is seen this tick.
    /// Once the cap is hit, tracking stops (overflow degrades gracefully:
    /// payloads still apply and emit, idempotence no longer guaranteed).
    fn record(&mut self, id: u64) -> bool {
        if self.overflow {
            return true;
        }
        if self.ids.contains(&id) {
            return false;
        }
        if self.ids.len() >= APPLIED_SET_CAP {
            self.overflow = true;
            return true;
        }
        self.ids.insert(id);
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ApplicationCountersSnapshot {
    pub outcomes_applied: u64,
    pub duplicate_outcomes_rejected: u64,
    pub idempotence_overflow: u64,
    pub events_created: u64,
}

#[derive(Default)]
struct ApplicationCounters {
    outcomes_applied: AtomicU64,
    duplicate_outcomes_rejected: AtomicU64,
    idempotence_overflow: AtomicU64,
    events_created: AtomicU64,
}

impl ApplicationCounters {
    fn snapshot(&self) -> ApplicationCountersSnapshot {
        ApplicationCountersSnapshot {
            outcomes_applied: self.outcomes_applied.load(Ordering::Acquire),
            duplicate_outcomes_rejected: self.duplicate_outcomes_rejected.load(Ordering::Acquire),
            idempotence_overflow: self.idempotence_overflow.load(Ordering::Acquire),
            events_created: self.events_created.load(Ordering::Acquire),
        }
    }
}

fn intent_result_payload_id(r: &IntentResult) -> u64 {
    fnv64_mix(&[1, fnv64_str(&r.intent_id), 0])
}

fn damage_payload_id(d: &DamageOutcome) -> u64 {
    fnv64_mix(&[2, d.outcome_id, 0])
}

fn mitigation_payload_id(m: &MitigationOutcome) -> u64 {
    fnv64_mix(&[3, m.outcome_id, 0])
}

fn state_change_payload_id(s: &CombatStateChange) -> u64 {
    fnv64_mix(&[4, s.entity.value() as u64, s.kind.kind_byte()])
}

pub struct CombatOutcomeApplication {
    applied_sets: HashMap<Tick, AppliedSetForTick>,
    counters: ApplicationCounters,
}

impl CombatOutcomeApplication {
    pub fn new() -> Self {
        Self {
            applied_sets: HashMap::new(),
            counters: ApplicationCounters::default(),
        }
    }

    pub fn counters(&self) -> ApplicationCountersSnapshot {
        self.counters.snapshot()
    }

    fn prune_stale(&mut self, current_tick: Tick) {
        let horizon = current_tick.saturating_sub(PRUNE_HORIZON);
        self.applied_sets.retain(|&tick, _| tick >= horizon);
    }

    /// Applies `batch` for `current_tick`. Must be called on the tick
    /// thread (enforced transitively by the authority's mutation calls).
    pub fn apply(
        &mut self,
        batch: &CombatOutcomeBatch,
        current_tick: Tick,
        authority: &mut CombatStateAuthority,
        events: &mut dyn CombatEventSink,
        checkpoints: &mut dyn CheckpointRequester,
    ) -> Result<(), CombatFault> {
        if batch.tick != current_tick {
            return Err(CombatFault::TickMismatch {
                expected: current_tick,
                got: batch.tick,
            });
        }

        let mut seen_in_batch = HashSet::new();
        for id in batch
            .intent_results
            .iter()
            .map(intent_result_payload_id)
            .chain(batch.damage_outcomes.iter().map(damage_payload_id))
            .chain(batch.mitigation_outcomes.iter().map(mitigation_payload_id))
            .chain(batch.state_changes.iter().map(state_change_payload_id))
        {
            if !seen_in_batch.insert(id) {
                return Err(CombatFault::DuplicatePayloadInBatch { payload_id: id });
            }
        }

        self.prune_stale(current_tick);
        let applied_set = self
            .applied_sets
            .entry(current_tick)
            .or_insert_with(AppliedSetForTick::new);

        let mut any_applied = false;

        for r in &batch.intent_results {
            if r.result_status == ResultStatus::Accepted {
                return Err(CombatFault::AcceptedIntentResultAtApplyTime {
                    intent_id: r.intent_id.clone(),
                });
            }
            let payload_id = intent_result_payload_id(r);
            if !applied_set.record(payload_id) {
                self.counters
                    .duplicate_outcomes_rejected
                    .fetch_add(1, Ordering::AcqRel);
                continue;
            }
            if applied_set.overflow {
                self.counters
                    .idempotence_overflow
                    .fetch_add(1, Ordering::AcqRel);
            }
            apply_intent_result(r, current_tick, authority)?;
            emit_event(events, &self.counters, CombatEventType::IntentResult, current_tick, payload_id);
            self.counters.outcomes_applied.fetch_add(1, Ordering::AcqRel);
            any_applied = true;
        }

        for d in &batch.damage_outcomes {
            let payload_id = damage_payload_id(d);
            if !applied_set.record(payload_id) {
                self.counters
                    .duplicate_outcomes_rejected
                    .fetch_add(1, Ordering::AcqRel);
                continue;
            }
            if applied_set.overflow {
                self.counters
                    .idempotence_overflow
                    .fetch_add(1, Ordering::AcqRel);
            }
            emit_event(events, &self.counters, CombatEventType::DamageOutcome, current_tick, payload_id);
            self.counters.outcomes_applied.fetch_add(1, Ordering::AcqRel);
            any_applied = true;
        }

        for m in &batch.mitigation_outcomes {
            let payload_id = mitigation_payload_id(m);
            if !applied_set.record(payload_id) {
                self.counters
                    .duplicate_outcomes_rejected
                    .fetch_add(1, Ordering::AcqRel);
                continue;
            }
            if applied_set.overflow {
                self.counters
                    .idempotence_overflow
                    .fetch_add(1, Ordering::AcqRel);
            }
            emit_event(events, &self.counters, CombatEventType::MitigationOutcome, current_tick, payload_id);
            self.counters.outcomes_applied.fetch_add(1, Ordering::AcqRel);
            any_applied = true;
        }

        for s in &batch.state_changes {
            let payload_id = state_change_payload_id(s);
            if !applied_set.record(payload_id) {
                self.counters
                    .duplicate_outcomes_rejected
                    .fetch_add(1, Ordering::AcqRel);
                continue;
            }
            if applied_set.overflow {
                self.counters
                    .idempotence_overflow
                    .fetch_add(1, Ordering::AcqRel);
            }
            authority.apply_state_change(s, current_tick)?;
            emit_event(events, &self.counters, CombatEventType::StateChange, current_tick, payload_id);
            self.counters.outcomes_applied.fetch_add(1, Ordering::AcqRel);
            any_applied = true;
        }

        if any_applied {
            checkpoints.request_checkpoint(current_tick);
        }

        Ok(())
    }
}

impl Default for CombatOutcomeApplication {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_intent_result(
    r: &IntentResult,
    current_tick: Tick,
    authority: &mut CombatStateAuthority,
) -> Result<(), CombatFault> {
    match r.result_status {
        ResultStatus::Accepted => unreachable!("checked by caller"),
        ResultStatus::Rejected => {
            authority.record_last_resolved(r.actor_entity, r.intent_id.clone());
        }
        ResultStatus::Resolved | ResultStatus::Canceled => {
            let current = authority.get_state(r.actor_entity, current_tick);
            if matches!(current.state, CombatState::Acting | CombatState::Defending) {
                if current.committed_intent_id.as_deref() != Some(r.intent_id.as_str()) {
                    return Err(CombatFault::CommittedIntentMismatch {
                        entity: r.actor_entity,
                        expected: current.committed_intent_id.clone().unwrap_or_default(),
                        got: r.intent_id.clone(),
                    });
                }
                authority.transition_to_engaged_preserving_context(r.actor_entity, current_tick)?;
            }
            authority.record_last_resolved(r.actor_entity, r.intent_id.clone());
        }
    }
    Ok(())
}

fn emit_event(
    events: &mut dyn CombatEventSink,
    counters: &ApplicationCounters,
    event_type: CombatEventType,
    tick: Tick,
    payload_id: u64,
) {
    let event_id = fnv64_mix(&[tick, event_type.kind_byte(), payload_id]);
    events.emit(CombatEvent {
        event_id,
        event_type,
        tick,
        payload_id,
    });
    counters.events_created.fetch_add(1, Ordering::AcqRel);
}
