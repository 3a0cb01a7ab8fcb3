//! Combat state authority (C6): owns `CombatEntityState` keyed by
//! `EntityHandle`, evaluates gating against a frozen intent queue, and
//! exposes the mutation API used by C8.

use std::collections::HashMap;
use std::sync::Arc;

use tickcore_sim::{EntityHandle, Tick, TickThreadGuard};

use crate::error::CombatRejection;
use crate::types::{
    CombatEntityState, CombatState, CombatStateChange, FrozenIntentRecord, GatingResult,
    IntentDisposition, IntentType, RejectionNotification, RejectionReason, StateChangeKind,
};

/// Gating table (spec §4.4). `true` means the intent is legal in the state.
fn is_allowed(state: CombatState, intent_type: IntentType) -> bool {
    use CombatState::*;
    use IntentType::*;
    match (state, intent_type) {
        (Idle, Movement | Interact) => true,
        (Idle, _) => false,
        (Engaged, Cancel) => false,
        (Engaged, _) => true,
        (Acting, Cancel) => true,
        (Acting, _) => false,
        (Defending, Cancel) => true,
        (Defending, _) => false,
        (Restricted, Defend | Movement | Cancel) => true,
        (Restricted, _) => false,
        (Incapacitated, Cancel) => true,
        (Incapacitated, _) => false,
    }
}

pub struct CombatStateAuthority {
    states: HashMap<EntityHandle, CombatEntityState>,
    guard: Arc<TickThreadGuard>,
    /// `last_resolved_intent_id[actor]`, tracked by C8's apply step.
    last_resolved_intent_id: HashMap<EntityHandle, String>,
}

impl CombatStateAuthority {
    pub fn new(guard: Arc<TickThreadGuard>) -> Self {
        Self {
            states: HashMap::new(),
            guard,
            last_resolved_intent_id: HashMap::new(),
        }
    }

    /// Returns the entity's state, lazily creating it in `Idle` on first
    /// reference.
    pub fn get_state(&mut self, entity: EntityHandle, tick: Tick) -> CombatEntityState {
        self.states
            .entry(entity)
            .or_insert_with(|| CombatEntityState::idle(entity, tick))
            .clone()
    }

    pub fn last_resolved_intent_id(&self, actor: EntityHandle) -> Option<&str> {
        self.last_resolved_intent_id.get(&actor).map(String::as_str)
    }

    pub(crate) fn record_last_resolved(&mut self, actor: EntityHandle, intent_id: String) {
        self.last_resolved_intent_id.insert(actor, intent_id);
    }

    /// Idle -> Engaged with the given combat context. Rejected if the
    /// entity is not currently Idle.
    pub fn establish_combat_context(
        &mut self,
        entity: EntityHandle,
        context_id: String,
        tick: Tick,
    ) -> Result<(), CombatRejection> {
        if !self.guard.is_mutation_allowed_now() {
            return Err(CombatRejection::MidTickMutationForbidden);
        }
        let current = self.get_state(entity, tick);
        if current.state != CombatState::Idle {
            return Err(CombatRejection::InvalidTransition);
        }
        self.states.insert(
            entity,
            CombatEntityState {
                entity,
                state: CombatState::Engaged,
                combat_context_id: context_id,
                committed_intent_id: None,
                state_change_tick: tick,
            },
        );
        Ok(())
    }

    /// Mutation API: applies an explicit state change. Validates invariants
    /// post-mutation — violation is fatal (`InvalidCombatState`). Callers
    /// (C8) run exclusively on the tick thread by contract; this asserts
    /// rather than returning a recoverable rejection.
    pub fn apply_state_change(
        &mut self,
        change: &CombatStateChange,
        tick: Tick,
    ) -> Result<(), crate::CombatFault> {
        self.guard.assert_tick_thread();
        let state = match change.kind {
            StateChangeKind::ToIdle => CombatState::Idle,
            StateChangeKind::ToEngaged => CombatState::Engaged,
            StateChangeKind::ToActing => CombatState::Acting,
            StateChangeKind::ToDefending => CombatState::Defending,
            StateChangeKind::ToRestricted => CombatState::Restricted,
            StateChangeKind::ToIncapacitated => CombatState::Incapacitated,
        };
        let next = CombatEntityState {
            entity: change.entity,
            state,
            combat_context_id: change.combat_context_id.clone().unwrap_or_default(),
            committed_intent_id: change.committed_intent_id.clone(),
            state_change_tick: tick,
        };
        next.check_invariants()?;
        self.states.insert(change.entity, next);
        Ok(())
    }

    /// Transition an actor to `Engaged`, preserving `combat_context_id`,
    /// used by C8 when an `Acting`/`Defending` intent resolves or cancels.
    pub(crate) fn transition_to_engaged_preserving_context(
        &mut self,
        entity: EntityHandle,
        tick: Tick,
    ) -> Result<(), crate::CombatFault> {
        let current = self.get_state(entity, tick);
        let next = CombatEntityState {
            entity,
            state: CombatState::Engaged,
            combat_context_id: current.combat_context_id,
            committed_intent_id: None,
            state_change_tick: tick,
        };
        next.check_invariants()?;
        self.states.insert(entity, next);
        Ok(())
    }

    /// Read-only evaluation of a frozen intent queue. Preserves input
    /// order; never mutates state (pre/post snapshots are bitwise equal by
    /// construction — this takes `&self`).
    pub fn gate_frozen_queue(&self, frozen: &[FrozenIntentRecord]) -> GatingResult {
        let mut accepted_intents = Vec::new();
        let mut dispositions = Vec::with_capacity(frozen.len());
        let mut rejections = Vec::new();

        for record in frozen {
            let current = self
                .states
                .get(&record.actor_entity)
                .cloned()
                .unwrap_or_else(|| CombatEntityState::idle(record.actor_entity, record.submit_tick));

            let reason = if current.check_invariants().is_err() {
                Some(RejectionReason::InvalidCombatState)
            } else if current.state != CombatState::Idle && current.combat_context_id.is_empty() {
                Some(RejectionReason::MissingCombatContext)
            } else if !is_allowed(current.state, record.intent_type) {
                Some(RejectionReason::IntentBlockedByState)
            } else {
                None
            };

            match reason {
                None => {
                    accepted_intents.push(record.clone());
                    dispositions.push(IntentDisposition::Accepted {
                        intent_id: record.intent_id.clone(),
                    });
                }
                Some(reason) => {
                    dispositions.push(IntentDisposition::Rejected {
                        intent_id: record.intent_id.clone(),
                        reason,
                    });
                    rejections.push(RejectionNotification {
                        intent_id: record.intent_id.clone(),
                        actor_entity: record.actor_entity,
                        reason,
                    });
                }
            }
        }

        GatingResult {
            accepted_intents,
            dispositions,
            rejections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, intent_type: IntentType, actor: EntityHandle, seq: u64) -> FrozenIntentRecord {
        FrozenIntentRecord {
            intent_id: id.to_string(),
            intent_type,
            actor_entity: actor,
            submit_tick: 10,
            deterministic_sequence: seq,
        }
    }

    fn authority() -> CombatStateAuthority {
        CombatStateAuthority::new(Arc::new(TickThreadGuard::new()))
    }

    #[test]
    fn fresh_entity_is_idle() {
        let mut authority = authority();
        let state = authority.get_state(EntityHandle::new(1), 0);
        assert_eq!(state.state, CombatState::Idle);
        assert!(state.combat_context_id.is_empty());
    }

    #[test]
    fn idle_allows_movement_and_interact_only() {
        let mut authority = authority();
        let e = EntityHandle::new(1);
        authority.get_state(e, 0);
        let queue = vec![
            record("a", IntentType::Attack, e, 0),
            record("m", IntentType::Movement, e, 1),
            record("i", IntentType::Interact, e, 2),
            record("c", IntentType::Cancel, e, 3),
        ];
        let result = authority.gate_frozen_queue(&queue);
        assert_eq!(result.accepted_intents.len(), 2);
        assert_eq!(result.accepted_intents[0].intent_id, "m");
        assert_eq!(result.accepted_intents[1].intent_id, "i");
        assert_eq!(result.dispositions.len(), 4);
        assert_eq!(result.rejections.len(), 2);
    }

    #[test]
    fn gating_preserves_order() {
        let mut authority = authority();
        let e = EntityHandle::new(2);
        authority.get_state(e, 0);
        let queue = vec![
            record("m1", IntentType::Movement, e, 0),
            record("x", IntentType::Attack, e, 1),
            record("m2", IntentType::Movement, e, 2),
        ];
        let result = authority.gate_frozen_queue(&queue);
        let ids: Vec<_> = result
            .dispositions
            .iter()
            .map(|d| match d {
                IntentDisposition::Accepted { intent_id } => intent_id.clone(),
                IntentDisposition::Rejected { intent_id, .. } => intent_id.clone(),
            })
            .collect();
        assert_eq!(ids, vec!["m1", "x", "m2"]);
    }

    #[test]
    fn engaged_allows_everything_but_cancel() {
        let guard = Arc::new(TickThreadGuard::new());
        guard.capture_current_thread();
        guard.set_phase(tickcore_sim::TickPhase::Execution);
        let mut authority = CombatStateAuthority::new(guard);
        let e = EntityHandle::new(3);
        authority
            .establish_combat_context(e, "ctx".to_string(), 0)
            .unwrap();
        let queue = vec![
            record("atk", IntentType::Attack, e, 0),
            record("def", IntentType::Defend, e, 1),
            record("abl", IntentType::Ability, e, 2),
            record("mov", IntentType::Movement, e, 3),
            record("int", IntentType::Interact, e, 4),
            record("cxl", IntentType::Cancel, e, 5),
        ];
        let result = authority.gate_frozen_queue(&queue);
        assert_eq!(result.accepted_intents.len(), 5);
        assert_eq!(result.rejections.len(), 1);
        assert_eq!(result.rejections[0].intent_id, "cxl");
    }

    #[test]
    fn mutation_forbidden_outside_permitted_phase() {
        let mut authority = authority();
        let e = EntityHandle::new(4);
        let result = authority.establish_combat_context(e, "ctx".to_string(), 0);
        assert_eq!(result, Err(CombatRejection::MidTickMutationForbidden));
    }

    #[test]
    fn establish_context_requires_idle() {
        let guard = Arc::new(TickThreadGuard::new());
        guard.capture_current_thread();
        guard.set_phase(tickcore_sim::TickPhase::Execution);
        let mut authority = CombatStateAuthority::new(guard);
        let e = EntityHandle::new(5);
        authority
            .establish_combat_context(e, "ctx".to_string(), 0)
            .unwrap();
        let result = authority.establish_combat_context(e, "ctx2".to_string(), 1);
        assert_eq!(result, Err(CombatRejection::InvalidTransition));
    }
}
