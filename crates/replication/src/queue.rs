//! Bounded outbound snapshot queue (C12) and delta serialization glue (C11).
//!
//! Wraps `tickcore-wire`'s per-session baseline serializer with a
//! count-and-byte-capped FIFO per session. Overflow drops the oldest
//! entries (and releases their leases) until both caps are satisfied.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tickcore_pool::{Lease, Pool};
use tickcore_sim::{SessionId, Tick};
use tickcore_wire::{Baseline, ClientReplicationSnapshot as WireSnapshot};

use crate::capture::{ClientReplicationSnapshot, ReplicationSnapshotSink};

#[derive(Debug, Clone, Copy)]
pub struct OutboundQueueConfig {
    pub max_outbound_snapshots_per_session: usize,
    pub max_queued_bytes_per_session: usize,
}

/// One serialized, queued delta awaiting a transport send.
pub struct SerializedSnapshot {
    pub tick: Tick,
    pub bytes: Lease<Vec<u8>>,
    pub byte_len: usize,
}

#[derive(Default)]
struct SessionOutbound {
    baseline: Baseline,
    queue: VecDeque<SerializedSnapshot>,
    byte_count: usize,
}

#[derive(Default)]
pub struct OutboundQueueCounters {
    pub enqueued: AtomicU64,
    pub dropped: AtomicU64,
    pub dequeued_for_send: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundQueueCountersSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub dequeued_for_send: u64,
}

impl OutboundQueueCounters {
    pub fn snapshot(&self) -> OutboundQueueCountersSnapshot {
        OutboundQueueCountersSnapshot {
            enqueued: self.enqueued.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
            dequeued_for_send: self.dequeued_for_send.load(Ordering::Acquire),
        }
    }
}

/// Implements `IReplicationSnapshotQueue`: takes each captured snapshot,
/// serializes it against the session's baseline, and enqueues the bytes
/// into the session's bounded outbound FIFO.
pub struct BoundedOutboundSnapshotQueue {
    config: OutboundQueueConfig,
    sessions: Mutex<HashMap<SessionId, SessionOutbound>>,
    pool: Pool<Vec<u8>>,
    counters: OutboundQueueCounters,
}

impl BoundedOutboundSnapshotQueue {
    pub fn new(config: OutboundQueueConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            pool: Pool::new(|| Vec::with_capacity(512)),
            counters: OutboundQueueCounters::default(),
        }
    }

    pub fn counters(&self) -> &OutboundQueueCounters {
        &self.counters
    }

    /// Pops the oldest queued snapshot for `session`, if any.
    pub fn dequeue_for_send(&self, session: SessionId) -> Option<SerializedSnapshot> {
        let mut sessions = self.sessions.lock().unwrap();
        let outbound = sessions.get_mut(&session)?;
        let item = outbound.queue.pop_front()?;
        outbound.byte_count -= item.byte_len;
        self.counters.dequeued_for_send.fetch_add(1, Ordering::AcqRel);
        Some(item)
    }

    pub fn queued_len(&self, session: SessionId) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .get(&session)
            .map(|o| o.queue.len())
            .unwrap_or(0)
    }

    /// Drops the session's entire queue and releases every lease.
    pub fn teardown_session(&self, session: SessionId) {
        if let Some(outbound) = self.sessions.lock().unwrap().remove(&session) {
            for item in outbound.queue {
                item.bytes.dispose();
            }
        }
    }

    fn enforce_caps(&self, outbound: &mut SessionOutbound) {
        while outbound.queue.len() > self.config.max_outbound_snapshots_per_session
            || outbound.byte_count > self.config.max_queued_bytes_per_session
        {
            let Some(dropped) = outbound.queue.pop_front() else {
                break;
            };
            outbound.byte_count -= dropped.byte_len;
            dropped.bytes.dispose();
            self.counters.dropped.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl ReplicationSnapshotSink for BoundedOutboundSnapshotQueue {
    fn enqueue(&self, session: SessionId, snapshot: ClientReplicationSnapshot) {
        let wire_snapshot = WireSnapshot {
            authoritative_tick: snapshot.authoritative_tick,
            entities: snapshot
                .entities
                .into_iter()
                .map(|e| tickcore_wire::ReplicatedEntitySnapshot {
                    entity: e.entity,
                    state_fingerprint: e.state_fingerprint,
                })
                .collect(),
        };

        let mut sessions = self.sessions.lock().unwrap();
        let outbound = sessions.entry(session).or_default();
        let encoded = outbound.baseline.emit_delta(&wire_snapshot);

        let lease = self.pool.rent();
        let byte_len = encoded.len();
        lease.with_mut(|buf| buf.extend_from_slice(&encoded));

        outbound.byte_count += byte_len;
        outbound.queue.push_back(SerializedSnapshot {
            tick: snapshot.authoritative_tick,
            bytes: lease,
            byte_len,
        });
        self.counters.enqueued.fetch_add(1, Ordering::AcqRel);

        self.enforce_caps(outbound);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickcore_sim::EntityHandle;

    fn snapshot(tick: Tick, entries: &[(u32, &str)]) -> ClientReplicationSnapshot {
        ClientReplicationSnapshot {
            authoritative_tick: tick,
            entities: entries
                .iter()
                .map(|&(e, fp)| crate::ReplicatedEntitySnapshot {
                    entity: EntityHandle::new(e),
                    state_fingerprint: fp.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn enqueue_then_dequeue_returns_bytes() {
        let q = BoundedOutboundSnapshotQueue::new(OutboundQueueConfig {
            max_outbound_snapshots_per_session: 4,
            max_queued_bytes_per_session: 4096,
        });
        let session = SessionId::new(1);
        q.enqueue(session, snapshot(1, &[(1, "a")]));
        let item = q.dequeue_for_send(session).unwrap();
        assert_eq!(item.tick, 1);
        assert_eq!(q.queued_len(session), 0);
    }

    #[test]
    fn count_overflow_drops_oldest() {
        let q = BoundedOutboundSnapshotQueue::new(OutboundQueueConfig {
            max_outbound_snapshots_per_session: 1,
            max_queued_bytes_per_session: 4096,
        });
        let session = SessionId::new(1);
        q.enqueue(session, snapshot(1, &[(1, "a")]));
        q.enqueue(session, snapshot(2, &[(1, "b")]));
        assert_eq!(q.queued_len(session), 1);
        let item = q.dequeue_for_send(session).unwrap();
        assert_eq!(item.tick, 2);
        assert_eq!(q.counters().snapshot().dropped, 1);
    }

    #[test]
    fn teardown_releases_all_leases() {
        let q = BoundedOutboundSnapshotQueue::new(OutboundQueueConfig {
            max_outbound_snapshots_per_session: 4,
            max_queued_bytes_per_session: 4096,
        });
        let session = SessionId::new(1);
        q.enqueue(session, snapshot(1, &[(1, "a")]));
        q.teardown_session(session);
        assert_eq!(q.queued_len(session), 0);
    }
}
