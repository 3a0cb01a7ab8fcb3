//! Pure combat resolution engine (C7): maps accepted intents 1:1,
//! order-preserving, to outcome proposals. No side effects, no access to
//! authoritative state beyond what is passed in.

use tickcore_sim::{fnv64_mix, Tick};

use crate::types::{CombatOutcomeProposal, FrozenIntentRecord, IntentType, OutcomeKind};

fn outcome_kind_for(intent_type: IntentType) -> OutcomeKind {
    match intent_type {
        IntentType::Attack => OutcomeKind::AttackProposed,
        IntentType::Defend => OutcomeKind::DefenseProposed,
        IntentType::Ability => OutcomeKind::AbilityProposed,
        IntentType::Movement => OutcomeKind::MovementProposed,
        IntentType::Interact => OutcomeKind::InteractionProposed,
        IntentType::Cancel => OutcomeKind::CancellationEvaluated,
    }
}

/// Resolves an accepted-intent queue into one proposal per intent, in the
/// same order. Pure function: identical input always yields identical
/// output, independent of wall-clock time or call order relative to other
/// entities.
pub fn resolve(accepted: &[FrozenIntentRecord], tick: Tick) -> Vec<CombatOutcomeProposal> {
    accepted
        .iter()
        .map(|record| CombatOutcomeProposal {
            intent_id: record.intent_id.clone(),
            intent_type: record.intent_type,
            actor: record.actor_entity,
            tick,
            outcome_kind: outcome_kind_for(record.intent_type),
        })
        .collect()
}

/// Deterministic payload id for a proposal, used downstream by C8 when it
/// turns a proposal into applied outcomes. `fnv64_mix` over the intent
/// type's kind byte, the actor handle, and the tick keeps the id stable
/// across replays of the same resolved batch.
pub fn proposal_payload_id(proposal: &CombatOutcomeProposal) -> u64 {
    fnv64_mix(&[
        proposal.intent_type.kind_byte(),
        proposal.actor.value() as u64,
        proposal.tick,
    ])
}
