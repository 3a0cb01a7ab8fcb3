//! Replay recording and determinism verification.
//!
//! Records every intent frozen for gating across a run, plus enough
//! bookkeeping to reconstruct it: initial per-entity state fingerprints,
//! the entity set, and a build fingerprint. `verify_replay` re-drives the
//! combat gating/resolution/application pipeline tick by tick from that
//! recording and checks the final fingerprints match — the Determinism
//! property (spec §8) exercised end to end, independent of transport,
//! ingress, or scheduling.

#![deny(unsafe_code)]

use std::fs;
use std::io::{self, Read};

use tickcore_combat::{
    resolve, CheckpointRequester, CombatEvent, CombatEventSink, CombatOutcomeApplication,
    CombatOutcomeBatch, CombatStateAuthority, FrozenIntentRecord, IntentResult, IntentType,
    OutcomeKind, ResultStatus,
};
use tickcore_sim::{fnv64_mix, fnv64_str, EntityHandle, Tick, TickThreadGuard};
use tickcore_wire::{Baseline, ClientReplicationSnapshot, ReplicatedEntitySnapshot};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Encodes a final fingerprint set through a fresh `Baseline`, the same
/// wire layout `tickcore-replication` uses for live delta serialization.
/// Two independent runs of identical inputs must produce identical bytes
/// here — that's the "byte-identical serialized snapshots" half of the
/// determinism property, not just matching fingerprints.
fn encode_final_snapshot(tick: Tick, fingerprints: &[(EntityHandle, u64)]) -> Vec<u8> {
    let mut entities: Vec<ReplicatedEntitySnapshot> = fingerprints
        .iter()
        .map(|&(entity, fp)| ReplicatedEntitySnapshot {
            entity,
            state_fingerprint: fp.to_string(),
        })
        .collect();
    entities.sort_by_key(|e| e.entity.value());
    Baseline::new().emit_delta(&ClientReplicationSnapshot {
        authoritative_tick: tick,
        entities,
    })
}

fn intent_kind_tag(kind: IntentType) -> u32 {
    match kind {
        IntentType::Attack => 0,
        IntentType::Defend => 1,
        IntentType::Ability => 2,
        IntentType::Movement => 3,
        IntentType::Interact => 4,
        IntentType::Cancel => 5,
    }
}

fn intent_kind_from_tag(tag: u32) -> Option<IntentType> {
    match tag {
        0 => Some(IntentType::Attack),
        1 => Some(IntentType::Defend),
        2 => Some(IntentType::Ability),
        3 => Some(IntentType::Movement),
        4 => Some(IntentType::Interact),
        5 => Some(IntentType::Cancel),
        _ => None,
    }
}

/// Same fingerprint scheme `tickcore-server`'s `CombatStateReplicationReader`
/// uses, reproduced here since this crate never depends on the server
/// orchestrator — only on the pure pipeline it wires together.
fn fingerprint_state(state: &tickcore_combat::CombatEntityState) -> u64 {
    let state_tag = match state.state {
        tickcore_combat::CombatState::Idle => 0,
        tickcore_combat::CombatState::Engaged => 1,
        tickcore_combat::CombatState::Acting => 2,
        tickcore_combat::CombatState::Defending => 3,
        tickcore_combat::CombatState::Restricted => 4,
        tickcore_combat::CombatState::Incapacitated => 5,
    };
    fnv64_mix(&[
        state_tag,
        fnv64_str(&state.combat_context_id),
        state
            .committed_intent_id
            .as_deref()
            .map(fnv64_str)
            .unwrap_or(0),
    ])
}

struct NullEventSink;
impl CombatEventSink for NullEventSink {
    fn emit(&mut self, _event: CombatEvent) {}
}

struct NullCheckpointRequester;
impl CheckpointRequester for NullCheckpointRequester {
    fn request_checkpoint(&mut self, _tick: Tick) {}
}

/// Minimal pass-through outcome batch, identical in shape to
/// `tickcore-server`'s own construction — no damage/mitigation/state-change
/// rows are synthesized by this pipeline stage.
fn build_outcome_batch(tick: Tick, proposals: &[tickcore_combat::CombatOutcomeProposal]) -> CombatOutcomeBatch {
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

/// One recorded intent, tagged with the tick it was frozen for.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedIntent {
    pub tick: Tick,
    pub intent_id: String,
    pub intent_type: IntentType,
    pub actor_entity: EntityHandle,
    pub submit_tick: Tick,
    pub deterministic_sequence: u64,
}

impl RecordedIntent {
    fn from_frozen(tick: Tick, record: &FrozenIntentRecord) -> Self {
        Self {
            tick,
            intent_id: record.intent_id.clone(),
            intent_type: record.intent_type,
            actor_entity: record.actor_entity,
            submit_tick: record.submit_tick,
            deterministic_sequence: record.deterministic_sequence,
        }
    }

    fn to_frozen(&self) -> FrozenIntentRecord {
        FrozenIntentRecord {
            intent_id: self.intent_id.clone(),
            intent_type: self.intent_type,
            actor_entity: self.actor_entity,
            submit_tick: self.submit_tick,
            deterministic_sequence: self.deterministic_sequence,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildFingerprintData {
    pub binary_sha256: String,
    pub target_triple: String,
    pub profile: String,
    pub git_commit: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplayConfig {
    pub tick_rate_hz: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { tick_rate_hz: 20 }
    }
}

/// Records a run's intent stream for later determinism verification.
pub struct ReplayRecorder {
    config: ReplayConfig,
    entity_spawn_order: Vec<EntityHandle>,
    initial_fingerprints: Vec<(EntityHandle, u64)>,
    intents: Vec<RecordedIntent>,
    build_fingerprint: Option<BuildFingerprintData>,
}

impl ReplayRecorder {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            entity_spawn_order: Vec::new(),
            initial_fingerprints: Vec::new(),
            intents: Vec::new(),
            build_fingerprint: None,
        }
    }

    pub fn record_entity(&mut self, entity: EntityHandle) {
        self.entity_spawn_order.push(entity);
    }

    pub fn record_initial_fingerprint(&mut self, entity: EntityHandle, fingerprint: u64) {
        self.initial_fingerprints.push((entity, fingerprint));
    }

    /// Records one tick's frozen intent queue, in the order gating saw it.
    pub fn record_tick_intents(&mut self, tick: Tick, frozen: &[FrozenIntentRecord]) {
        self.intents
            .extend(frozen.iter().map(|r| RecordedIntent::from_frozen(tick, r)));
    }

    pub fn set_build_fingerprint(&mut self, fingerprint: BuildFingerprintData) {
        self.build_fingerprint = Some(fingerprint);
    }

    pub fn finalize(
        self,
        final_fingerprints: Vec<(EntityHandle, u64)>,
        checkpoint_tick: Tick,
        end_reason: &str,
    ) -> ReplayArtifact {
        let final_wire_encoding = encode_final_snapshot(checkpoint_tick, &final_fingerprints);
        ReplayArtifact {
            replay_format_version: 1,
            tick_rate_hz: self.config.tick_rate_hz,
            entity_spawn_order: self.entity_spawn_order,
            initial_fingerprints: self.initial_fingerprints,
            intents: self.intents,
            build_fingerprint: self.build_fingerprint,
            final_fingerprints,
            final_wire_encoding,
            checkpoint_tick,
            end_reason: end_reason.to_string(),
        }
    }
}

/// The recorded artifact: everything `verify_replay` needs to re-derive
/// the run's final state from scratch and compare.
#[derive(Debug, Clone)]
pub struct ReplayArtifact {
    pub replay_format_version: u32,
    pub tick_rate_hz: u32,
    pub entity_spawn_order: Vec<EntityHandle>,
    pub initial_fingerprints: Vec<(EntityHandle, u64)>,
    pub intents: Vec<RecordedIntent>,
    pub build_fingerprint: Option<BuildFingerprintData>,
    pub final_fingerprints: Vec<(EntityHandle, u64)>,
    pub final_wire_encoding: Vec<u8>,
    pub checkpoint_tick: Tick,
    pub end_reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyError {
    BuildMismatch { expected: String, actual: String },
    InputStreamInvalid { reason: String },
    FinalFingerprintMismatch { entity: EntityHandle, expected: u64, actual: u64 },
    MissingFinalFingerprint { entity: EntityHandle },
    FinalSnapshotEncodingMismatch,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::BuildMismatch { expected, actual } => {
                write!(f, "build fingerprint mismatch: expected {expected}, got {actual}")
            }
            VerifyError::InputStreamInvalid { reason } => write!(f, "invalid intent stream: {reason}"),
            VerifyError::FinalFingerprintMismatch { entity, expected, actual } => write!(
                f,
                "final fingerprint mismatch for entity {entity}: expected {expected:#x}, got {actual:#x}"
            ),
            VerifyError::MissingFinalFingerprint { entity } => {
                write!(f, "no recorded final fingerprint for entity {entity}")
            }
            VerifyError::FinalSnapshotEncodingMismatch => {
                write!(f, "recomputed final snapshot encoding does not match the recorded one")
            }
        }
    }
}

impl std::error::Error for VerifyError {}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub strict_build_check: bool,
    pub current_build: Option<BuildFingerprintData>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            strict_build_check: true,
            current_build: None,
        }
    }
}

/// Re-runs the recorded intent stream through a fresh gating/resolution/
/// application pipeline, tick by tick, and checks the resulting fingerprints
/// match what was recorded.
pub fn verify_replay(artifact: &ReplayArtifact, options: &VerifyOptions) -> Result<(), VerifyError> {
    if let (Some(recorded), Some(current)) = (&artifact.build_fingerprint, &options.current_build) {
        let mismatch = recorded.binary_sha256 != current.binary_sha256
            || recorded.target_triple != current.target_triple
            || recorded.profile != current.profile;
        if mismatch && options.strict_build_check {
            return Err(VerifyError::BuildMismatch {
                expected: recorded.binary_sha256.clone(),
                actual: current.binary_sha256.clone(),
            });
        }
    }

    for intent in &artifact.intents {
        if intent.tick >= artifact.checkpoint_tick {
            return Err(VerifyError::InputStreamInvalid {
                reason: format!(
                    "intent {:?} recorded at tick {}, outside replay range [0, {})",
                    intent.intent_id, intent.tick, artifact.checkpoint_tick
                ),
            });
        }
        // Round-trips through the wire tag scheme to catch any intent kind
        // this crate's local mapping can't reproduce.
        if intent_kind_from_tag(intent_kind_tag(intent.intent_type)) != Some(intent.intent_type) {
            return Err(VerifyError::InputStreamInvalid {
                reason: format!("intent {:?} has an unrepresentable intent kind", intent.intent_id),
            });
        }
    }

    let guard = Arc::new(TickThreadGuard::new());
    guard.capture_current_thread();
    guard.set_phase(tickcore_sim::TickPhase::Execution);

    let mut authority = CombatStateAuthority::new(Arc::clone(&guard));
    let mut application = CombatOutcomeApplication::new();
    let mut events = NullEventSink;
    let mut checkpoints = NullCheckpointRequester;

    for entity in &artifact.entity_spawn_order {
        authority.get_state(*entity, 0);
    }

    for tick in 0..artifact.checkpoint_tick {
        let frozen: Vec<FrozenIntentRecord> = artifact
            .intents
            .iter()
            .filter(|i| i.tick == tick)
            .map(RecordedIntent::to_frozen)
            .collect();
        if frozen.is_empty() {
            continue;
        }

        let gating = authority.gate_frozen_queue(&frozen);
        if gating.accepted_intents.is_empty() {
            continue;
        }
        let proposals = resolve(&gating.accepted_intents, tick);
        let batch = build_outcome_batch(tick, &proposals);
        application
            .apply(&batch, tick, &mut authority, &mut events, &mut checkpoints)
            .map_err(|fault| VerifyError::InputStreamInvalid { reason: fault.to_string() })?;
    }

    for &entity in &artifact.entity_spawn_order {
        let Some(&(_, expected)) = artifact.final_fingerprints.iter().find(|(e, _)| *e == entity) else {
            return Err(VerifyError::MissingFinalFingerprint { entity });
        };
        let state = authority.get_state(entity, artifact.checkpoint_tick);
        let actual = fingerprint_state(&state);
        if actual != expected {
            return Err(VerifyError::FinalFingerprintMismatch { entity, expected, actual });
        }
    }

    let recomputed_encoding = encode_final_snapshot(artifact.checkpoint_tick, &artifact.final_fingerprints);
    if recomputed_encoding != artifact.final_wire_encoding {
        return Err(VerifyError::FinalSnapshotEncodingMismatch);
    }

    Ok(())
}

/// Best-effort build fingerprint: the running binary's SHA-256, target
/// triple, and profile. Used to gate strict replay verification to same-
/// build runs.
pub fn acquire_build_fingerprint() -> io::Result<BuildFingerprintData> {
    let exe_path = std::env::current_exe()?;
    let mut file = fs::File::open(&exe_path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let binary_sha256 = format!("{:x}", hasher.finalize());

    let target_triple = get_target_triple();
    let profile = if cfg!(debug_assertions) { "dev" } else { "release" };
    let git_commit = std::env::var("TICKCORE_GIT_COMMIT").unwrap_or_else(|_| "unknown".to_string());

    Ok(BuildFingerprintData {
        binary_sha256,
        target_triple,
        profile: profile.to_string(),
        git_commit,
    })
}

fn get_target_triple() -> String {
    #[cfg(target_os = "linux")]
    {
        #[cfg(target_arch = "x86_64")]
        return "x86_64-unknown-linux-gnu".to_string();
        #[cfg(target_arch = "aarch64")]
        return "aarch64-unknown-linux-gnu".to_string();
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        return "unknown-unknown-linux-gnu".to_string();
    }
    #[cfg(target_os = "macos")]
    {
        #[cfg(target_arch = "x86_64")]
        return "x86_64-apple-darwin".to_string();
        #[cfg(target_arch = "aarch64")]
        return "aarch64-apple-darwin".to_string();
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        return "unknown-apple-darwin".to_string();
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        "unknown-unknown-unknown".to_string()
    }
}
