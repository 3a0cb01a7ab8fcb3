//! Session/player/entity bookkeeping, generalized from a single movement
//! world into an opaque entity set shared by every subsystem.
//!
//! Owned by the host, not the tick core: `SimulationEntityIndex`,
//! `ActiveSessionIndex`, `SnapshotEligibilityView`, and
//! `ReplicationEligibilityGate` are all implemented against this registry.

use std::collections::HashMap;
use std::sync::Mutex;

use tickcore_sim::{EntityHandle, PlayerId, SessionId};

struct SessionRecord {
    player: PlayerId,
    entities: Vec<EntityHandle>,
    connected: bool,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionRecord>,
    entity_owner: HashMap<EntityHandle, PlayerId>,
}

/// Tracks which sessions are connected, which player each belongs to, and
/// which entities that player currently owns. Read from the tick thread
/// (entity/session enumeration for the simulation core and replication) and
/// written from transport threads (accept/disconnect).
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn accept_session(&self, session: SessionId, player: PlayerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(
            session,
            SessionRecord {
                player,
                entities: Vec::new(),
                connected: true,
            },
        );
    }

    /// Marks the session disconnected without forgetting its entity
    /// ownership — a reconnect can pick the same player entities back up.
    pub fn disconnect_session(&self, session: SessionId) {
        if let Some(record) = self.inner.lock().unwrap().sessions.get_mut(&session) {
            record.connected = false;
        }
    }

    pub fn attach_entity(&self, session: SessionId, entity: EntityHandle) {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.sessions.get(&session) else {
            return;
        };
        let player = record.player;
        let record = inner.sessions.get_mut(&session).unwrap();
        record.entities.push(entity);
        inner.entity_owner.insert(entity, player);
    }

    /// The entity a session's commands should be attributed to: its first
    /// (primary) entity, if any.
    pub fn primary_entity(&self, session: SessionId) -> Option<EntityHandle> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(&session)
            .and_then(|r| r.entities.first().copied())
    }

    pub fn player_for_session(&self, session: SessionId) -> Option<PlayerId> {
        self.inner.lock().unwrap().sessions.get(&session).map(|r| r.player)
    }

    pub fn owner_of(&self, entity: EntityHandle) -> Option<PlayerId> {
        self.inner.lock().unwrap().entity_owner.get(&entity).copied()
    }

    pub fn teardown_session(&self, session: SessionId) {
        self.inner.lock().unwrap().sessions.remove(&session);
    }

    fn connected_sessions(&self) -> Vec<SessionId> {
        let inner = self.inner.lock().unwrap();
        let mut sessions: Vec<SessionId> = inner
            .sessions
            .iter()
            .filter(|(_, r)| r.connected)
            .map(|(s, _)| *s)
            .collect();
        sessions.sort();
        sessions
    }

    fn all_entities(&self) -> Vec<EntityHandle> {
        let inner = self.inner.lock().unwrap();
        let mut entities: Vec<EntityHandle> = inner
            .sessions
            .values()
            .flat_map(|r| r.entities.iter().copied())
            .collect();
        entities.sort();
        entities.dedup();
        entities
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl tickcore_sim::SimulationEntityIndex for SessionRegistry {
    fn snapshot_entities_deterministic(&self) -> Vec<EntityHandle> {
        self.all_entities()
    }
}

impl tickcore_replication::ActiveSessionIndex for SessionRegistry {
    fn snapshot_sessions_deterministic(&self) -> Vec<SessionId> {
        self.connected_sessions()
    }
}

impl tickcore_replication::SnapshotEligibilityView for SessionRegistry {
    fn is_snapshot_eligible(&self, session: SessionId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(&session)
            .map(|r| r.connected)
            .unwrap_or(false)
    }
}

/// Spatial/zone visibility is an explicitly out-of-scope collaborator
/// (spec §1); every entity this registry knows about is visible to every
/// connected session until an upstream zone system narrows it.
impl tickcore_replication::ReplicationEligibilityGate for SessionRegistry {
    fn is_entity_replication_eligible(&self, _session: SessionId, _entity: EntityHandle) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_entity_is_the_first_attached() {
        let registry = SessionRegistry::new();
        let session = SessionId::new(1);
        registry.accept_session(session, PlayerId::new(1));
        registry.attach_entity(session, EntityHandle::new(5));
        registry.attach_entity(session, EntityHandle::new(9));
        assert_eq!(registry.primary_entity(session), Some(EntityHandle::new(5)));
    }

    #[test]
    fn disconnect_excludes_session_from_active_index() {
        use tickcore_replication::ActiveSessionIndex;
        let registry = SessionRegistry::new();
        let session = SessionId::new(1);
        registry.accept_session(session, PlayerId::new(1));
        registry.disconnect_session(session);
        assert!(registry.snapshot_sessions_deterministic().is_empty());
    }

    #[test]
    fn entities_are_deterministically_sorted_and_deduped() {
        use tickcore_sim::SimulationEntityIndex;
        let registry = SessionRegistry::new();
        let s1 = SessionId::new(1);
        let s2 = SessionId::new(2);
        registry.accept_session(s1, PlayerId::new(1));
        registry.accept_session(s2, PlayerId::new(2));
        registry.attach_entity(s1, EntityHandle::new(9));
        registry.attach_entity(s2, EntityHandle::new(3));
        assert_eq!(
            registry.snapshot_entities_deterministic(),
            vec![EntityHandle::new(3), EntityHandle::new(9)]
        );
    }
}
