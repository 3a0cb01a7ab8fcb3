//! Combat error taxonomy (spec §7), scoped to C6-C8.

use std::fmt;

use tickcore_sim::{EntityHandle, Tick};

/// Fatal: terminates the tick and propagates to the runtime host. The host
/// may restart the process but must not continue the current tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombatFault {
    InvalidCombatState {
        entity: EntityHandle,
    },
    CommittedIntentMismatch {
        entity: EntityHandle,
        expected: String,
        got: String,
    },
    TickMismatch {
        expected: Tick,
        got: Tick,
    },
    DuplicatePayloadInBatch {
        payload_id: u64,
    },
    AcceptedIntentResultAtApplyTime {
        intent_id: String,
    },
}

impl fmt::Display for CombatFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombatFault::InvalidCombatState { entity } => {
                write!(f, "InvalidCombatState: entity {entity}")
            }
            CombatFault::CommittedIntentMismatch { entity, expected, got } => write!(
                f,
                "CommittedIntentMismatch: entity {entity} expected {expected:?}, got {got:?}"
            ),
            CombatFault::TickMismatch { expected, got } => {
                write!(f, "TickMismatch: expected {expected}, got {got}")
            }
            CombatFault::DuplicatePayloadInBatch { payload_id } => {
                write!(f, "DuplicatePayloadInBatch: {payload_id}")
            }
            CombatFault::AcceptedIntentResultAtApplyTime { intent_id } => write!(
                f,
                "AcceptedIntentResultAtApplyTime: intent {intent_id:?}"
            ),
        }
    }
}

impl std::error::Error for CombatFault {}

/// Recoverable: returned as an ordinary value, never used for control flow
/// across tick-phase boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatRejection {
    MidTickMutationForbidden,
    InvalidTransition,
}

impl fmt::Display for CombatRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombatRejection::MidTickMutationForbidden => write!(f, "MidTickMutationForbidden"),
            CombatRejection::InvalidTransition => write!(f, "InvalidTransition"),
        }
    }
}

impl std::error::Error for CombatRejection {}
