//! Peer Store: the single source of truth for per-peer state during a run.
//!
//! Two independent reader/writer locks guard disjoint state. The records
//! lock covers every [`PeerRecord`] and its nested sessions; the counts lock
//! covers the per-peer event counters. No call path holds both, so counter
//! increments never queue behind session mutations.
//!
//! Readers never see the live maps. Every read hands out owned clones, which
//! in Rust are deep by construction: sessions, score snapshots and topic maps
//! are all owned values, so nothing in a snapshot aliases the store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::types::{short_peer_id, PeerRecord};

/// Event-type tag -> occurrence count, per peer
pub type EventCounts = HashMap<String, HashMap<String, u64>>;

/// Access contract for peer state.
///
/// Mutators run while the implementation holds exclusive access to the
/// record, so at most one mutation per peer is ever in flight. The in-memory
/// implementation serializes all peers behind one lock; a sharded store can
/// be dropped in behind this trait without touching callers.
pub trait PeerStore: Send + Sync {
    /// Owned copy of one record, if known.
    fn get(&self, peer_id: &str) -> Option<PeerRecord>;

    /// Return the record for `peer_id`, creating an empty one if absent.
    fn create_if_absent(&self, peer_id: &str) -> PeerRecord;

    /// Apply `mutator` to an existing record.
    ///
    /// Returns `false` and leaves the store untouched when the peer is
    /// unknown.
    fn update(&self, peer_id: &str, mutator: &mut dyn FnMut(&mut PeerRecord)) -> bool;

    /// Apply `mutator`, creating a default record first if needed.
    fn update_or_create(&self, peer_id: &str, mutator: &mut dyn FnMut(&mut PeerRecord));

    fn increment_event_count(&self, peer_id: &str, event_type: &str);

    /// Independent copy of every record.
    fn snapshot_all(&self) -> HashMap<String, PeerRecord>;

    /// Independent copy of every event counter.
    fn snapshot_event_counts(&self) -> EventCounts;

    fn peer_count(&self) -> usize;

    /// Number of peers with an open session.
    fn active_peer_count(&self) -> usize;
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory [`PeerStore`] guarded by two `RwLock`s.
#[derive(Debug, Default)]
pub struct InMemoryPeerStore {
    peers: RwLock<HashMap<String, PeerRecord>>,
    event_counts: RwLock<EventCounts>,
}

impl InMemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events counted across all peers and types.
    pub fn total_event_count(&self) -> u64 {
        read(&self.event_counts)
            .values()
            .flat_map(|counts| counts.values())
            .sum()
    }
}

impl PeerStore for InMemoryPeerStore {
    fn get(&self, peer_id: &str) -> Option<PeerRecord> {
        read(&self.peers).get(peer_id).cloned()
    }

    fn create_if_absent(&self, peer_id: &str) -> PeerRecord {
        let mut peers = write(&self.peers);
        peers
            .entry(peer_id.to_string())
            .or_insert_with(|| {
                log::debug!("Created new peer {}", short_peer_id(peer_id));
                PeerRecord::new(peer_id, Utc::now())
            })
            .clone()
    }

    fn update(&self, peer_id: &str, mutator: &mut dyn FnMut(&mut PeerRecord)) -> bool {
        let mut peers = write(&self.peers);
        match peers.get_mut(peer_id) {
            Some(record) => {
                mutator(record);
                true
            }
            None => {
                log::warn!("Attempted to update unknown peer {}", short_peer_id(peer_id));
                false
            }
        }
    }

    fn update_or_create(&self, peer_id: &str, mutator: &mut dyn FnMut(&mut PeerRecord)) {
        let mut peers = write(&self.peers);
        let record = peers.entry(peer_id.to_string()).or_insert_with(|| {
            log::debug!("Created new peer {} from event", short_peer_id(peer_id));
            PeerRecord::new(peer_id, Utc::now())
        });
        mutator(record);
    }

    fn increment_event_count(&self, peer_id: &str, event_type: &str) {
        let mut counts = write(&self.event_counts);
        *counts
            .entry(peer_id.to_string())
            .or_default()
            .entry(event_type.to_string())
            .or_insert(0) += 1;
    }

    fn snapshot_all(&self) -> HashMap<String, PeerRecord> {
        read(&self.peers).clone()
    }

    fn snapshot_event_counts(&self) -> EventCounts {
        read(&self.event_counts).clone()
    }

    fn peer_count(&self) -> usize {
        read(&self.peers).len()
    }

    fn active_peer_count(&self) -> usize {
        read(&self.peers)
            .values()
            .filter(|record| record.is_connected())
            .count()
    }
}
