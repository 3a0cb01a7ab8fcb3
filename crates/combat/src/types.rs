//! Combat data model (spec §3): frozen intents, gating dispositions,
//! resolution outcomes, and the events application emits.

use tickcore_sim::{EntityHandle, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentType {
    Attack,
    Defend,
    Ability,
    Movement,
    Interact,
    Cancel,
}

impl IntentType {
    pub(crate) fn kind_byte(self) -> u64 {
        match self {
            IntentType::Attack => 0,
            IntentType::Defend => 1,
            IntentType::Ability => 2,
            IntentType::Movement => 3,
            IntentType::Interact => 4,
            IntentType::Cancel => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatState {
    Idle,
    Engaged,
    Acting,
    Defending,
    Restricted,
    Incapacitated,
}

/// Owned exclusively by the combat state authority (C6).
#[derive(Debug, Clone, PartialEq)]
pub struct CombatEntityState {
    pub entity: EntityHandle,
    pub state: CombatState,
    pub combat_context_id: String,
    pub committed_intent_id: Option<String>,
    pub state_change_tick: Tick,
}

impl CombatEntityState {
    pub fn idle(entity: EntityHandle, tick: Tick) -> Self {
        Self {
            entity,
            state: CombatState::Idle,
            combat_context_id: String::new(),
            committed_intent_id: None,
            state_change_tick: tick,
        }
    }

    /// Checks the structural invariants spec §3 requires after every
    /// mutation. Violations are fatal — never silently repaired.
    pub fn check_invariants(&self) -> Result<(), crate::CombatFault> {
        use CombatState::*;
        let context_empty = self.combat_context_id.is_empty();
        let ok = match self.state {
            Idle => context_empty && self.committed_intent_id.is_none(),
            Engaged => !context_empty && self.committed_intent_id.is_none(),
            Acting | Defending => !context_empty && self.committed_intent_id.is_some(),
            Restricted | Incapacitated => !context_empty,
        };
        if ok {
            Ok(())
        } else {
            Err(crate::CombatFault::InvalidCombatState { entity: self.entity })
        }
    }
}

/// Immutable input to gating; payload is opaque to the core.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenIntentRecord {
    pub intent_id: String,
    pub intent_type: IntentType,
    pub actor_entity: EntityHandle,
    pub submit_tick: Tick,
    pub deterministic_sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    IntentBlockedByState,
    MissingCombatContext,
    InvalidCombatState,
}

/// One disposition row per input intent, in input order.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentDisposition {
    Accepted { intent_id: String },
    Rejected { intent_id: String, reason: RejectionReason },
}

#[derive(Debug, Clone)]
pub struct RejectionNotification {
    pub intent_id: String,
    pub actor_entity: EntityHandle,
    pub reason: RejectionReason,
}

/// Result of `CombatStateAuthority::gate_frozen_queue`.
#[derive(Debug, Clone)]
pub struct GatingResult {
    pub accepted_intents: Vec<FrozenIntentRecord>,
    pub dispositions: Vec<IntentDisposition>,
    pub rejections: Vec<RejectionNotification>,
}

/// Outcome-kind of a resolved intent, produced by C7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    AttackProposed,
    DefenseProposed,
    AbilityProposed,
    MovementProposed,
    InteractionProposed,
    CancellationEvaluated,
}

/// One output row per accepted intent, same order as the input.
#[derive(Debug, Clone, PartialEq)]
pub struct CombatOutcomeProposal {
    pub intent_id: String,
    pub intent_type: IntentType,
    pub actor: EntityHandle,
    pub tick: Tick,
    pub outcome_kind: OutcomeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    /// Invalid at application time — the application entry check rejects
    /// any batch containing this.
    Accepted,
    Rejected,
    Resolved,
    Canceled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentResult {
    pub intent_id: String,
    pub intent_type: IntentType,
    pub actor_entity: EntityHandle,
    pub result_status: ResultStatus,
    pub authoritative_tick: Tick,
    pub reason_code: Option<String>,
    pub produced_outcome_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DamageOutcome {
    pub outcome_id: u64,
    pub source_entity: EntityHandle,
    pub target_entity: EntityHandle,
    pub resolved_intent_id: String,
    pub magnitude: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MitigationOutcome {
    pub outcome_id: u64,
    pub source_entity: EntityHandle,
    pub target_entity: EntityHandle,
    pub resolved_intent_id: String,
    pub magnitude: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeKind {
    ToIdle,
    ToEngaged,
    ToActing,
    ToDefending,
    ToRestricted,
    ToIncapacitated,
}

impl StateChangeKind {
    pub(crate) fn kind_byte(self) -> u64 {
        match self {
            StateChangeKind::ToIdle => 0,
            StateChangeKind::ToEngaged => 1,
            StateChangeKind::ToActing => 2,
            StateChangeKind::ToDefending => 3,
            StateChangeKind::ToRestricted => 4,
            StateChangeKind::ToIncapacitated => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombatStateChange {
    pub entity: EntityHandle,
    pub kind: StateChangeKind,
    pub combat_context_id: Option<String>,
    pub committed_intent_id: Option<String>,
}

/// A batch of resolved outcomes for exactly one authoritative tick.
#[derive(Debug, Clone, Default)]
pub struct CombatOutcomeBatch {
    pub tick: Tick,
    pub intent_results: Vec<IntentResult>,
    pub damage_outcomes: Vec<DamageOutcome>,
    pub mitigation_outcomes: Vec<MitigationOutcome>,
    pub state_changes: Vec<CombatStateChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatEventType {
    IntentResult,
    DamageOutcome,
    MitigationOutcome,
    StateChange,
}

impl CombatEventType {
    pub(crate) fn kind_byte(self) -> u64 {
        match self {
            CombatEventType::IntentResult => 0,
            CombatEventType::DamageOutcome => 1,
            CombatEventType::MitigationOutcome => 2,
            CombatEventType::StateChange => 3,
        }
    }
}

/// Emitted once per successfully-applied payload. `event_id` is
/// `fnv64(tick, event_type, payload_id)` — deterministic and stable across
/// replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatEvent {
    pub event_id: u64,
    pub event_type: CombatEventType,
    pub tick: Tick,
    pub payload_id: u64,
}

/// `ICombatEventSink`.
pub trait CombatEventSink {
    fn emit(&mut self, event: CombatEvent);
}

/// `ICheckpointRequester` — request-only, no I/O.
pub trait CheckpointRequester {
    fn request_checkpoint(&mut self, tick: Tick);
}
