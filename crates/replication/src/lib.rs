//! Replication snapshot capture and bounded outbound delivery (C10-C12).
//!
//! Capture produces one `ClientReplicationSnapshot` per eligible session
//! per tick; the outbound queue serializes it against a per-session
//! baseline (`tickcore-wire`) and holds the bytes until a transport
//! worker drains them.

#![deny(unsafe_code)]

mod capture;
mod queue;

use tickcore_sim::EntityHandle;

/// One entity's replication-relevant state as read by this tick's capture
/// pass. Distinct from `tickcore_wire::ReplicatedEntitySnapshot` — this is
/// the pre-serialization form produced by the state reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedEntitySnapshot {
    pub entity: EntityHandle,
    pub state_fingerprint: String,
}

pub use capture::{
    ActiveSessionIndex, CaptureCounters, CaptureCountersSnapshot, CaptureOutsidePostTick,
    ClientReplicationSnapshot, ReplicationEligibilityGate, ReplicationSnapshotSink,
    ReplicationStateReader, SnapshotCapture, SnapshotCaptureConfig, SnapshotEligibilityView,
};
pub use queue::{
    BoundedOutboundSnapshotQueue, OutboundQueueConfig, OutboundQueueCounters,
    OutboundQueueCountersSnapshot, SerializedSnapshot,
};
