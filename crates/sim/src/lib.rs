//! Authoritative tick core — simulation core crate.
//!
//! Pure, dependency-free foundation: opaque handles (C1), the eligibility
//! gate set (C3), the three-phase simulation core (C4), and the effect
//! buffer (C5). This crate performs no I/O, reads no wall-clock time, and
//! uses no ambient randomness — every external crate in this workspace that
//! needs deterministic ids or ordering builds on top of this one.

#![deny(unsafe_code)]

mod core;
mod effect;
mod fnv;
mod gate;
mod handle;
mod namespace_guard;
mod thread_guard;

pub use core::{
    PhaseHook, PreTickView, PostTickView, SimulationCore, SimulationEntityIndex,
    SimulationParticipant, SimulationTickContext, Tick, TickFault, TickReport,
};
pub use effect::{EffectBuffer, EffectBufferError, EffectCommand, DEFAULT_CAPACITY as EFFECT_BUFFER_DEFAULT_CAPACITY};
pub use fnv::{canonicalize_f64, fnv64_bytes, fnv64_mix, fnv64_str, Fnv1a64};
pub use gate::{EligibilityGate, EligibilityGateSet};
pub use handle::{
    EntityHandle, ItemInstanceId, NpcId, PlayerId, QuestInstanceId, SaveId, SessionId, ZoneId,
};
pub use namespace_guard::NamespaceGuard;
pub use thread_guard::{TickPhase, TickThreadGuard};
