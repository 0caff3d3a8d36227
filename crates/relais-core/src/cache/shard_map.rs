//! Sharded concurrent map backing the L1 entity cache.
//!
//! `2^k` shards, each guarded by its own reader/writer lock. Lookups take
//! shared locks and may mutate GDSF metadata through atomics; insertions,
//! invalidation and sweeps take the shard's exclusive lock. A sweep
//! processes exactly one shard, selected by an advancing cursor.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::metadata::CacheSlot;

/// Verdict returned by a `get` validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetAction {
    /// Serve the entry (metadata may have been bumped through atomics).
    Accept,
    /// Remove the entry and report a miss (e.g. TTL expired).
    Invalidate,
    /// Keep the entry but report a miss (ghost slots).
    Miss,
}

/// Decision returned by a `put_with` admission closure.
pub enum PutDecision<E> {
    /// Insert (or replace with) this slot.
    Insert(CacheSlot<E>),
    /// Leave the map unchanged.
    Keep,
}

/// What a `put_with` call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced,
    Kept,
}

/// Statistics from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub scanned: usize,
    pub removed: usize,
    pub removed_bytes: usize,
}

struct Shard<E: crate::entity::Entity> {
    map: RwLock<HashMap<E::Key, CacheSlot<E>>>,
}

/// The sharded map. An entry is owned by exactly one shard, a pure
/// function of its key's hash.
pub struct ShardMap<E: crate::entity::Entity> {
    shards: Vec<Shard<E>>,
    mask: usize,
    hasher: RandomState,
    sweep_cursor: AtomicUsize,
}

impl<E: crate::entity::Entity> ShardMap<E> {
    pub fn new(shard_count_log2: u8) -> Self {
        let count = 1usize << shard_count_log2.min(16);
        let shards = (0..count)
            .map(|_| Shard { map: RwLock::new(HashMap::new()) })
            .collect();
        Self {
            shards,
            mask: count - 1,
            hasher: RandomState::new(),
            sweep_cursor: AtomicUsize::new(0),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_of(&self, key: &E::Key) -> &Shard<E> {
        let mut h = self.hasher.build_hasher();
        key.hash(&mut h);
        let idx = (std::hash::Hasher::finish(&h) as usize) & self.mask;
        &self.shards[idx]
    }

    /// Look up a key. The validator inspects the slot under the shared
    /// lock and returns the action; `Invalidate` upgrades to the exclusive
    /// lock and removes the entry, returning its charged bytes so the
    /// caller can settle memory accounting.
    pub fn get(
        &self,
        key: &E::Key,
        validate: impl FnOnce(&CacheSlot<E>) -> GetAction,
    ) -> (Option<Arc<E>>, usize) {
        let shard = self.shard_of(key);
        let action;
        {
            let map = shard.map.read();
            let Some(slot) = map.get(key) else {
                return (None, 0);
            };
            action = validate(slot);
            if action == GetAction::Accept {
                return (slot.entity().cloned(), 0);
            }
        }
        if action == GetAction::Invalidate {
            let mut map = shard.map.write();
            if let Some(slot) = map.remove(key) {
                return (None, slot.charged_bytes());
            }
        }
        (None, 0)
    }

    /// Unconditional insert/overwrite. Returns the replaced slot, if any.
    pub fn put(&self, key: E::Key, slot: CacheSlot<E>) -> Option<CacheSlot<E>> {
        let shard = self.shard_of(&key);
        shard.map.write().insert(key, slot)
    }

    /// Admission-controlled insert: the closure sees the existing slot (if
    /// any) and decides. Returns the outcome plus the replaced slot.
    pub fn put_with(
        &self,
        key: E::Key,
        decide: impl FnOnce(Option<&CacheSlot<E>>) -> PutDecision<E>,
    ) -> (PutOutcome, Option<CacheSlot<E>>) {
        let shard = self.shard_of(&key);
        let mut map = shard.map.write();
        let existing = map.get(&key);
        match decide(existing) {
            PutDecision::Keep => (PutOutcome::Kept, None),
            PutDecision::Insert(slot) => {
                let old = map.insert(key, slot);
                if old.is_some() {
                    (PutOutcome::Replaced, old)
                } else {
                    (PutOutcome::Inserted, None)
                }
            }
        }
    }

    /// Remove an entry. Never leaves a ghost behind.
    pub fn invalidate(&self, key: &E::Key) -> Option<CacheSlot<E>> {
        self.shard_of(key).map.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.map.read().is_empty())
    }

    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.map.write();
            removed += map.len();
            map.clear();
        }
        removed
    }

    fn sweep_shard(
        &self,
        idx: usize,
        evict: &mut impl FnMut(&E::Key, &CacheSlot<E>) -> bool,
    ) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let mut map = self.shards[idx].map.write();
        map.retain(|key, slot| {
            outcome.scanned += 1;
            if evict(key, slot) {
                outcome.removed += 1;
                outcome.removed_bytes += slot.charged_bytes();
                false
            } else {
                true
            }
        });
        outcome
    }

    /// Sweep the next shard in cursor order (blocking on its lock).
    pub fn sweep(
        &self,
        mut evict: impl FnMut(&E::Key, &CacheSlot<E>) -> bool,
    ) -> SweepOutcome {
        let idx = self.sweep_cursor.fetch_add(1, Ordering::Relaxed) & self.mask;
        self.sweep_shard(idx, &mut evict)
    }

    /// Non-blocking sweep: returns `None` if the shard's exclusive lock is
    /// contended.
    pub fn try_sweep(
        &self,
        mut evict: impl FnMut(&E::Key, &CacheSlot<E>) -> bool,
    ) -> Option<SweepOutcome> {
        let idx = self.sweep_cursor.fetch_add(1, Ordering::Relaxed) & self.mask;
        let mut map = self.shards[idx].map.try_write()?;
        let mut outcome = SweepOutcome::default();
        map.retain(|key, slot| {
            outcome.scanned += 1;
            if evict(key, slot) {
                outcome.removed += 1;
                outcome.removed_bytes += slot.charged_bytes();
                false
            } else {
                true
            }
        });
        Some(outcome)
    }

    /// Full scan: sweep every shard in turn.
    pub fn purge(
        &self,
        mut evict: impl FnMut(&E::Key, &CacheSlot<E>) -> bool,
    ) -> SweepOutcome {
        let mut total = SweepOutcome::default();
        for idx in 0..self.shards.len() {
            let o = self.sweep_shard(idx, &mut evict);
            total.scanned += o.scanned;
            total.removed += o.removed;
            total.removed_bytes += o.removed_bytes;
        }
        total
    }

    /// Inspect a slot without counting as an access (test support).
    pub fn peek<R>(&self, key: &E::Key, f: impl FnOnce(&CacheSlot<E>) -> R) -> Option<R> {
        let map = self.shard_of(key).map.read();
        map.get(key).map(f)
    }
}
