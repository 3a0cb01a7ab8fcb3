//! Persistence write queue (C13).
//!
//! Every enqueued write is tracked in both a per-player FIFO and the
//! global FIFO at once. A cap violation on either axis drops the oldest
//! offender from both, so the two views never disagree about what is
//! still pending.

#![deny(unsafe_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tickcore_sim::PlayerId;

#[derive(Debug, Clone, Copy)]
pub struct PersistenceQueueConfig {
    pub max_writes_per_player: usize,
    pub max_bytes_per_player: usize,
    pub max_writes_global: usize,
    pub max_bytes_global: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceWriteRequest {
    pub player: PlayerId,
    pub payload: Vec<u8>,
}

struct Record {
    player: PlayerId,
    byte_len: usize,
    payload: Vec<u8>,
}

#[derive(Default)]
struct PlayerBook {
    sequences: VecDeque<u64>,
    byte_count: usize,
}

#[derive(Default)]
struct Inner {
    next_sequence: u64,
    by_sequence: BTreeMap<u64, Record>,
    per_player: HashMap<PlayerId, PlayerBook>,
    global_bytes: usize,
}

#[derive(Default)]
pub struct PersistenceCounters {
    pub request_enqueued: AtomicU64,
    pub request_drained: AtomicU64,
    pub drops: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceCountersSnapshot {
    pub request_enqueued: u64,
    pub request_drained: u64,
    pub drops: u64,
    pub backlog: u64,
}

pub struct PersistenceWriteQueue {
    config: PersistenceQueueConfig,
    inner: Mutex<Inner>,
    counters: PersistenceCounters,
}

impl PersistenceWriteQueue {
    pub fn new(config: PersistenceQueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            counters: PersistenceCounters::default(),
        }
    }

    pub fn counters(&self) -> PersistenceCountersSnapshot {
        let backlog = self.inner.lock().unwrap().by_sequence.len() as u64;
        PersistenceCountersSnapshot {
            request_enqueued: self.counters.request_enqueued.load(Ordering::Acquire),
            request_drained: self.counters.request_drained.load(Ordering::Acquire),
            drops: self.counters.drops.load(Ordering::Acquire),
            backlog,
        }
    }

    pub fn enqueue(&self, request: PersistenceWriteRequest) {
        let mut inner = self.inner.lock().unwrap();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let byte_len = request.payload.len();
        let player = request.player;

        inner.global_bytes += byte_len;
        let book = inner.per_player.entry(player).or_default();
        book.sequences.push_back(sequence);
        book.byte_count += byte_len;

        inner.by_sequence.insert(
            sequence,
            Record {
                player,
                byte_len,
                payload: request.payload,
            },
        );
        self.counters.request_enqueued.fetch_add(1, Ordering::AcqRel);

        self.enforce_player_caps(&mut inner, player);
        self.enforce_global_caps(&mut inner);
    }

    fn drop_sequence(&self, inner: &mut Inner, sequence: u64) {
        if let Some(record) = inner.by_sequence.remove(&sequence) {
            inner.global_bytes -= record.byte_len;
            if let Some(book) = inner.per_player.get_mut(&record.player) {
                if book.sequences.front() == Some(&sequence) {
                    book.sequences.pop_front();
                } else {
                    book.sequences.retain(|&s| s != sequence);
                }
                book.byte_count -= record.byte_len;
            }
            self.counters.drops.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn enforce_player_caps(&self, inner: &mut Inner, player: PlayerId) {
        loop {
            let Some(book) = inner.per_player.get(&player) else {
                break;
            };
            if book.sequences.len() <= self.config.max_writes_per_player
                && book.byte_count <= self.config.max_bytes_per_player
            {
                break;
            }
            let Some(&oldest) = book.sequences.front() else {
                break;
            };
            self.drop_sequence(inner, oldest);
        }
    }

    fn enforce_global_caps(&self, inner: &mut Inner) {
        loop {
            if inner.by_sequence.len() <= self.config.max_writes_global
                && inner.global_bytes <= self.config.max_bytes_global
            {
                break;
            }
            let Some(&oldest) = inner.by_sequence.keys().next() else {
                break;
            };
            self.drop_sequence(inner, oldest);
        }
    }

    /// Returns the globally-oldest pending write, keeping its player's FIFO
    /// consistent.
    pub fn dequeue(&self) -> Option<PersistenceWriteRequest> {
        let mut inner = self.inner.lock().unwrap();
        let sequence = *inner.by_sequence.keys().next()?;
        let record = inner.by_sequence.remove(&sequence).unwrap();
        inner.global_bytes -= record.byte_len;
        if let Some(book) = inner.per_player.get_mut(&record.player) {
            debug_assert_eq!(book.sequences.front(), Some(&sequence));
            book.sequences.pop_front();
            book.byte_count -= record.byte_len;
        }
        self.counters.request_drained.fetch_add(1, Ordering::AcqRel);
        Some(PersistenceWriteRequest {
            player: record.player,
            payload: record.payload,
        })
    }

    pub fn player_backlog(&self, player: PlayerId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .per_player
            .get(&player)
            .map(|b| b.sequences.len())
            .unwrap_or(0)
    }

    /// Drops every pending write for `player`.
    pub fn teardown_player(&self, player: PlayerId) {
        let mut inner = self.inner.lock().unwrap();
        let Some(book) = inner.per_player.remove(&player) else {
            return;
        };
        for sequence in book.sequences {
            if let Some(record) = inner.by_sequence.remove(&sequence) {
                inner.global_bytes -= record.byte_len;
                self.counters.drops.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Drops every pending write across all players.
    pub fn teardown_all(&self) {
        *self.inner.lock().unwrap() = Inner::default();
    }
}
