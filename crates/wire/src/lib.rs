//! Replication delta wire layout (C11).
//!
//! Fixed little-endian binary layout, no framing — transport wraps this.
//! Deliberately not protobuf: the contract is a scalar layout over a
//! changed/removed entity set, not an evolving message schema.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use tickcore_sim::{EntityHandle, Tick};

/// One entity's replication-relevant state, as read from the committed
/// world by an external reader. The fingerprint is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedEntitySnapshot {
    pub entity: EntityHandle,
    pub state_fingerprint: String,
}

/// Ordered snapshot of one session's replicated entities for one tick.
/// Sorted ascending by `entity.value` before serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReplicationSnapshot {
    pub authoritative_tick: Tick,
    pub entities: Vec<ReplicatedEntitySnapshot>,
}

/// Decoded delta: entities whose fingerprint changed since the baseline,
/// and entities present in the baseline but absent from this snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delta {
    pub tick: Tick,
    pub changed: Vec<ReplicatedEntitySnapshot>,
    pub removed: Vec<EntityHandle>,
}

/// Per-session baseline: last-sent fingerprint per entity. No other
/// state — sort buffers used during emission are transient.
#[derive(Debug, Default)]
pub struct Baseline {
    fingerprints: HashMap<EntityHandle, String>,
}

impl Baseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diffs `snapshot` against the current baseline, emits the fixed wire
    /// layout, then replaces the baseline with the snapshot's fingerprints.
    pub fn emit_delta(&mut self, snapshot: &ClientReplicationSnapshot) -> Vec<u8> {
        let mut present = std::collections::HashSet::new();
        let mut changed: Vec<&ReplicatedEntitySnapshot> = Vec::new();

        for entry in &snapshot.entities {
            present.insert(entry.entity);
            match self.fingerprints.get(&entry.entity) {
                Some(existing) if *existing == entry.state_fingerprint => {}
                _ => changed.push(entry),
            }
        }

        let mut removed: Vec<EntityHandle> = self
            .fingerprints
            .keys()
            .copied()
            .filter(|e| !present.contains(e))
            .collect();

        changed.sort_by_key(|e| e.entity.value());
        removed.sort_by_key(|e| e.value());

        let encoded = encode(snapshot.authoritative_tick, &changed, &removed);

        self.fingerprints = snapshot
            .entities
            .iter()
            .map(|e| (e.entity, e.state_fingerprint.clone()))
            .collect();

        encoded
    }
}

fn encode(tick: Tick, changed: &[&ReplicatedEntitySnapshot], removed: &[EntityHandle]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_i64::<LittleEndian>(tick as i64).unwrap();
    buf.write_i32::<LittleEndian>(changed.len() as i32).unwrap();
    buf.write_i32::<LittleEndian>(removed.len() as i32).unwrap();
    for entry in changed {
        let bytes = entry.state_fingerprint.as_bytes();
        buf.write_i32::<LittleEndian>(entry.entity.value() as i32).unwrap();
        buf.write_i32::<LittleEndian>(bytes.len() as i32).unwrap();
        buf.write_all(bytes).unwrap();
    }
    for entity in removed {
        buf.write_i32::<LittleEndian>(entity.value() as i32).unwrap();
    }
    buf
}

/// Decoding error: the byte stream is truncated or malformed.
#[derive(Debug)]
pub struct DecodeError(io::Error);

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed replication delta: {}", self.0)
    }
}

impl std::error::Error for DecodeError {}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> Self {
        DecodeError(e)
    }
}

/// Decodes a buffer emitted by `Baseline::emit_delta`. Exists mainly for
/// round-trip tests and test-harness tooling; production transport
/// consumers decode on the client side, outside this crate.
pub fn decode(bytes: &[u8]) -> Result<Delta, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let tick = cursor.read_i64::<LittleEndian>()? as Tick;
    let n_changed = cursor.read_i32::<LittleEndian>()?;
    let n_removed = cursor.read_i32::<LittleEndian>()?;

    let mut changed = Vec::with_capacity(n_changed.max(0) as usize);
    for _ in 0..n_changed {
        let entity = cursor.read_i32::<LittleEndian>()? as u32;
        let len = cursor.read_i32::<LittleEndian>()? as usize;
        let mut fingerprint_bytes = vec![0u8; len];
        cursor.read_exact(&mut fingerprint_bytes)?;
        let state_fingerprint = String::from_utf8(fingerprint_bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        changed.push(ReplicatedEntitySnapshot {
            entity: EntityHandle::new(entity),
            state_fingerprint,
        });
    }

    let mut removed = Vec::with_capacity(n_removed.max(0) as usize);
    for _ in 0..n_removed {
        let entity = cursor.read_i32::<LittleEndian>()? as u32;
        removed.push(EntityHandle::new(entity));
    }

    Ok(Delta {
        tick,
        changed,
        removed,
    })
}
