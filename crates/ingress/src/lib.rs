//! Authoritative command ingress (C9).
//!
//! Per-session bounded mailboxes fed by transport workers; drained only by
//! the tick thread. Overflow rejects and disposes the rented payload
//! immediately — the tick thread is never blocked waiting on ingress.

#![deny(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use tickcore_pool::Pool;
use tickcore_sim::{SessionId, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressRejection {
    InvalidSession,
    BackpressureLimitHit,
}

impl std::fmt::Display for IngressRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngressRejection::InvalidSession => write!(f, "InvalidSession"),
            IngressRejection::BackpressureLimitHit => write!(f, "BackpressureLimitHit"),
        }
    }
}

impl std::error::Error for IngressRejection {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted(u64),
    Rejected(IngressRejection),
}

/// One drained unit of work. `payload` is a rented buffer; the consumer
/// disposes it once the command has been turned into gameplay effects.
pub struct CommandEnvelope {
    pub session_id: SessionId,
    pub submit_tick: Tick,
    pub deterministic_sequence: u64,
    pub command_type: u32,
    pub payload: tickcore_pool::Lease<Vec<u8>>,
    pub byte_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngressConfig {
    pub max_inbound_commands_per_session: usize,
    pub max_queued_bytes_per_session: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionDropMetrics {
    pub dropped_count: u64,
    pub dropped_bytes: u64,
}

struct SessionMailbox {
    queue: VecDeque<CommandEnvelope>,
    byte_count: usize,
    metrics: SessionDropMetrics,
}

impl SessionMailbox {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            byte_count: 0,
            metrics: SessionDropMetrics::default(),
        }
    }
}

pub struct AuthoritativeCommandIngress {
    config: IngressConfig,
    sessions: HashMap<SessionId, SessionMailbox>,
    pool: Pool<Vec<u8>>,
    next_sequence: AtomicU64,
}

impl AuthoritativeCommandIngress {
    pub fn new(config: IngressConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            pool: Pool::new(|| Vec::with_capacity(256)),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn register_session(&mut self, session: SessionId) {
        self.sessions.entry(session).or_insert_with(SessionMailbox::new);
    }

    /// Drops the whole queue, disposes its leases, and returns the final
    /// drop metrics for that session.
    pub fn teardown_session(&mut self, session: SessionId) -> SessionDropMetrics {
        let Some(mut mailbox) = self.sessions.remove(&session) else {
            return SessionDropMetrics::default();
        };
        for envelope in mailbox.queue.drain(..) {
            mailbox.metrics.dropped_count += 1;
            mailbox.metrics.dropped_bytes += envelope.byte_len as u64;
            envelope.payload.dispose();
        }
        mailbox.metrics
    }

    pub fn session_metrics(&self, session: SessionId) -> SessionDropMetrics {
        self.sessions
            .get(&session)
            .map(|m| m.metrics)
            .unwrap_or_default()
    }

    pub fn try_enqueue(
        &mut self,
        session: SessionId,
        payload: &[u8],
        command_type: u32,
        submit_tick: Tick,
    ) -> EnqueueOutcome {
        let Some(mailbox) = self.sessions.get_mut(&session) else {
            return EnqueueOutcome::Rejected(IngressRejection::InvalidSession);
        };

        let would_be_bytes = mailbox.byte_count + payload.len();
        let would_be_count = mailbox.queue.len() + 1;
        if would_be_count > self.config.max_inbound_commands_per_session
            || would_be_bytes > self.config.max_queued_bytes_per_session
        {
            mailbox.metrics.dropped_count += 1;
            mailbox.metrics.dropped_bytes += payload.len() as u64;
            return EnqueueOutcome::Rejected(IngressRejection::BackpressureLimitHit);
        }

        let lease = self.pool.rent();
        lease.with_mut(|buf| buf.extend_from_slice(payload));

        let deterministic_sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);
        mailbox.byte_count += payload.len();
        mailbox.queue.push_back(CommandEnvelope {
            session_id: session,
            submit_tick,
            deterministic_sequence,
            command_type,
            payload: lease,
            byte_len: payload.len(),
        });

        EnqueueOutcome::Accepted(deterministic_sequence)
    }

    /// Tick-thread-only: drains up to `max_commands`, smallest
    /// `deterministic_sequence` first, ties broken by ascending
    /// `session_id`. Returns the number of envelopes moved into `dest`.
    pub fn drain_deterministic(&mut self, dest: &mut Vec<CommandEnvelope>, max_commands: usize) -> usize {
        let mut drained = 0;
        while drained < max_commands {
            let next_session = self
                .sessions
                .iter()
                .filter(|(_, mailbox)| !mailbox.queue.is_empty())
                .min_by_key(|(session_id, mailbox)| {
                    (mailbox.queue.front().unwrap().deterministic_sequence, session_id.value())
                })
                .map(|(session_id, _)| *session_id);

            let Some(session_id) = next_session else {
                break;
            };
            let envelope = self
                .sessions
                .get_mut(&session_id)
                .unwrap()
                .queue
                .pop_front()
                .unwrap();
            let mailbox = self.sessions.get_mut(&session_id).unwrap();
            mailbox.byte_count -= envelope.byte_len;
            dest.push(envelope);
            drained += 1;
        }
        drained
    }
}
