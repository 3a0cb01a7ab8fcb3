//! Wires the authoritative command ingress into the combat gating/resolution
//! pipeline as a `SimulationParticipant`.
//!
//! `step` only gets `&self`, so the actual state mutation
//! (`CombatOutcomeApplication::apply`, which needs `&mut CombatStateAuthority`
//! and asserts the tick thread) is deferred into a
//! `EffectCommand::CombatOutcomeCommit` closure. That closure runs
//! synchronously during `EffectBuffer::commit()` at post-tick finalization,
//! still on the tick thread, which is the only place the mutation is legal.
use std::sync::{Arc, Mutex};

use tickcore_combat::{
    resolve, CombatEventSink, CombatOutcomeApplication, CombatOutcomeBatch, CombatStateAuthority,
    CheckpointRequester, FrozenIntentRecord, IntentResult, IntentType, OutcomeKind, ResultStatus,
};
use tickcore_ingress::AuthoritativeCommandIngress;
use tickcore_sim::{EffectCommand, EntityHandle, SimulationParticipant, SimulationTickContext};

use crate::registry::SessionRegistry;

/// The wire-level command tags an envelope's `command_type` can carry.
/// Matches `IntentType::kind_byte`'s ordinal scheme; unrecognized tags are
/// dropped rather than treated as a new intent kind.
fn decode_intent_type(command_type: u32) -> Option<IntentType> {
    match command_type {
        0 => Some(IntentType::Attack),
        1 => Some(IntentType::Defend),
        2 => Some(IntentType::Ability),
        3 => Some(IntentType::Movement),
        4 => Some(IntentType::Interact),
        5 => Some(IntentType::Cancel),
        _ => None,
    }
}

/// Logs emitted combat events; no buffering or transport concern lives here.
pub struct TracingCombatEventSink;

impl CombatEventSink for TracingCombatEventSink {
    fn emit(&mut self, event: tickcore_combat::CombatEvent) {
        tracing::debug!(
            event_id = event.event_id,
            tick = event.tick,
            payload_id = event.payload_id,
            "combat event"
        );
    }
}

/// A checkpoint request is distinct from a player save: it only logs here.
/// Feeding `tickcore-persistence` from a checkpoint would conflate the two,
/// so `PersistenceWriteQueue` is left for an external caller to drive.
pub struct TickCheckpointRequester;

impl CheckpointRequester for TickCheckpointRequester {
    fn request_checkpoint(&mut self, tick: tickcore_sim::Tick) {
        tracing::info!(tick, "checkpoint requested");
    }
}

/// Builds a minimal, deterministic outcome batch from resolved proposals.
/// Every accepted intent becomes a pass-through `IntentResult`; no damage,
/// mitigation, or state-change entries are synthesized here — the actual
/// combat math belongs to a game-rules layer above this pipeline.
fn build_outcome_batch(tick: tickcore_sim::Tick, proposals: &[tickcore_combat::CombatOutcomeProposal]) -> CombatOutcomeBatch {
    let intent_results = proposals
        .iter()
        .map(|p| IntentResult {
            intent_id: p.intent_id.clone(),
            intent_type: p.intent_type,
            actor_entity: p.actor,
            result_status: if p.outcome_kind == OutcomeKind::CancellationEvaluated {
                ResultStatus::Canceled
            } else {
                ResultStatus::Resolved
            },
            authoritative_tick: tick,
            reason_code: None,
            produced_outcome_ids: Vec::new(),
        })
        .collect();

    CombatOutcomeBatch {
        tick,
        intent_results,
        damage_outcomes: Vec::new(),
        mitigation_outcomes: Vec::new(),
        state_changes: Vec::new(),
    }
}

pub struct CombatTickParticipant {
    ingress: Arc<Mutex<AuthoritativeCommandIngress>>,
    authority: Arc<Mutex<CombatStateAuthority>>,
    application: Arc<Mutex<CombatOutcomeApplication>>,
    events: Arc<Mutex<TracingCombatEventSink>>,
    checkpoints: Arc<Mutex<TickCheckpointRequester>>,
    sessions: Arc<SessionRegistry>,
    max_commands_per_tick: usize,
}

impl CombatTickParticipant {
    pub fn new(
        ingress: Arc<Mutex<AuthoritativeCommandIngress>>,
        authority: Arc<Mutex<CombatStateAuthority>>,
        application: Arc<Mutex<CombatOutcomeApplication>>,
        sessions: Arc<SessionRegistry>,
        max_commands_per_tick: usize,
    ) -> Self {
        Self {
            ingress,
            authority,
            application,
            events: Arc::new(Mutex::new(TracingCombatEventSink)),
            checkpoints: Arc::new(Mutex::new(TickCheckpointRequester)),
            sessions,
            max_commands_per_tick,
        }
    }

    fn freeze_envelopes(&self, tick: tickcore_sim::Tick) -> Vec<FrozenIntentRecord> {
        let mut envelopes = Vec::new();
        self.ingress
            .lock()
            .unwrap()
            .drain_deterministic(&mut envelopes, self.max_commands_per_tick);

        envelopes
            .into_iter()
            .filter_map(|envelope| {
                let intent_type = decode_intent_type(envelope.command_type);
                let actor_entity = self.sessions.primary_entity(envelope.session_id);
                envelope.payload.dispose();

                let intent_type = match intent_type {
                    Some(t) => t,
                    None => {
                        tracing::warn!(command_type = envelope.command_type, "unrecognized intent tag");
                        return None;
                    }
                };
                let actor_entity = match actor_entity {
                    Some(e) => e,
                    None => {
                        tracing::warn!(session = envelope.session_id.value(), "no primary entity for session");
                        return None;
                    }
                };

                Some(FrozenIntentRecord {
                    intent_id: format!("{}:{}", envelope.session_id.value(), envelope.deterministic_sequence),
                    intent_type,
                    actor_entity,
                    submit_tick: envelope.submit_tick,
                    deterministic_sequence: envelope.deterministic_sequence,
                })
            })
            .collect()
    }

}

impl SimulationParticipant for CombatTickParticipant {
    fn order_key(&self) -> i64 {
        0
    }

    fn step(&self, ctx: &SimulationTickContext<'_>, _eligible: &[EntityHandle]) {
        let tick = ctx.tick_index;
        let frozen = self.freeze_envelopes(tick);
        if frozen.is_empty() {
            return;
        }

        let gating = self.authority.lock().unwrap().gate_frozen_queue(&frozen);
        for rejection in &gating.rejections {
            tracing::debug!(
                intent_id = %rejection.intent_id,
                entity = rejection.actor_entity.value(),
                reason = ?rejection.reason,
                "intent rejected at gating"
            );
        }
        if gating.accepted_intents.is_empty() {
            return;
        }

        let proposals = resolve(&gating.accepted_intents, tick);
        let batch = build_outcome_batch(tick, &proposals);

        let application = Arc::clone(&self.application);
        let authority = Arc::clone(&self.authority);
        let events = Arc::clone(&self.events);
        let checkpoints = Arc::clone(&self.checkpoints);

        ctx.buffer_effect(EffectCommand::CombatOutcomeCommit(Box::new(move || {
            let mut application = application.lock().unwrap();
            let mut authority = authority.lock().unwrap();
            let mut events = events.lock().unwrap();
            let mut checkpoints = checkpoints.lock().unwrap();
            if let Err(fault) = application.apply(&batch, tick, &mut authority, &mut *events, &mut *checkpoints) {
                panic!("combat outcome application fault: {fault}");
            }
        })))
        .expect("effect buffer rejected combat commit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickcore_ingress::IngressConfig;
    use tickcore_sim::{PlayerId, SessionId, SimulationCore, SimulationEntityIndex, TickThreadGuard};

    struct FixedIndex(Vec<EntityHandle>);
    impl SimulationEntityIndex for FixedIndex {
        fn snapshot_entities_deterministic(&self) -> Vec<EntityHandle> {
            self.0.clone()
        }
    }

    fn make_participant() -> (CombatTickParticipant, Arc<Mutex<AuthoritativeCommandIngress>>) {
        let guard = Arc::new(TickThreadGuard::new());
        guard.capture_current_thread();

        let sessions = Arc::new(SessionRegistry::new());
        let session = SessionId::new(1);
        sessions.accept_session(session, PlayerId::new(1));
        sessions.attach_entity(session, EntityHandle::new(7));

        let ingress = Arc::new(Mutex::new(AuthoritativeCommandIngress::new(IngressConfig {
            max_inbound_commands_per_session: 16,
            max_queued_bytes_per_session: 4096,
        })));
        ingress.lock().unwrap().register_session(session);

        let authority = Arc::new(Mutex::new(CombatStateAuthority::new(guard)));
        let application = Arc::new(Mutex::new(CombatOutcomeApplication::new()));

        let participant = CombatTickParticipant::new(Arc::clone(&ingress), authority, application, sessions, 32);
        (participant, ingress)
    }

    #[test]
    fn movement_intent_against_idle_entity_is_accepted_and_applied() {
        let (participant, ingress) = make_participant();
        let session = SessionId::new(1);
        ingress
            .lock()
            .unwrap()
            .try_enqueue(session, b"payload", 3 /* Movement */, 0);

        let mut core = SimulationCore::new(1.0 / 20.0);
        core.register_participant(Box::new(participant));
        let index = FixedIndex(vec![EntityHandle::new(7)]);
        let report = core.run_tick(0, &index).unwrap();
        assert_eq!(report.effects_committed, 1);
    }

    #[test]
    fn attack_intent_against_idle_entity_is_rejected_at_gating() {
        let (participant, ingress) = make_participant();
        let session = SessionId::new(1);
        ingress
            .lock()
            .unwrap()
            .try_enqueue(session, b"payload", 0 /* Attack */, 0);

        let mut core = SimulationCore::new(1.0 / 20.0);
        core.register_participant(Box::new(participant));
        let index = FixedIndex(vec![EntityHandle::new(7)]);
        // Idle only allows Movement/Interact, so no commit is ever buffered.
        let report = core.run_tick(0, &index).unwrap();
        assert_eq!(report.effects_committed, 0);
    }
}
