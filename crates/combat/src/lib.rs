//! Combat state/gating/resolution/application pipeline (C6-C8).
//!
//! Built on top of `tickcore-sim`'s handles, tick-thread guard, and fixed
//! tick lifecycle. Owns no I/O; every collaborator it needs (event sink,
//! checkpoint requester) is a trait the host wires at boot.

#![deny(unsafe_code)]

mod application;
mod authority;
mod error;
mod resolution;
mod types;

pub use application::{ApplicationCountersSnapshot, CombatOutcomeApplication};
pub use authority::CombatStateAuthority;
pub use error::{CombatFault, CombatRejection};
pub use resolution::{proposal_payload_id, resolve};
pub use types::{
    CheckpointRequester, CombatEntityState, CombatEvent, CombatEventSink, CombatEventType,
    CombatOutcomeBatch, CombatOutcomeProposal, CombatState, CombatStateChange, DamageOutcome,
    FrozenIntentRecord, GatingResult, IntentDisposition, IntentResult, IntentType,
    MitigationOutcome, OutcomeKind, RejectionNotification, RejectionReason, ResultStatus,
    StateChangeKind,
};
