//! Per-entry cache metadata.
//!
//! A slot holds one of four shapes, matching what the repository
//! configuration needs: no metadata, a TTL timestamp, full GDSF metadata,
//! or a ghost (admission-control placeholder with no entity value).
//!
//! GDSF access counts decay lazily: the decay multiplier is computed from
//! the difference between the global generation and the generation stored
//! alongside the count, then both are written back with one compare-and-
//! swap. Losing the race is benign - the decay is idempotent and the next
//! reader converges.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Count lives in the high 32 bits, generation in the low 32.
pub fn pack_count_gen(count: u32, generation: u32) -> u64 {
    (u64::from(count) << 32) | u64::from(generation)
}

pub fn unpack_count_gen(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

const COUNT_UNIT: u64 = 1 << 32;

/// GDSF metadata: packed `{access_count, generation}` word plus an
/// optional expiry timestamp (0 = no TTL).
#[derive(Debug)]
pub struct GdsfMeta {
    packed: AtomicU64,
    expires_at: AtomicI64,
}

impl GdsfMeta {
    pub fn new(generation: u32, expires_at: i64) -> Self {
        Self {
            packed: AtomicU64::new(pack_count_gen(1, generation)),
            expires_at: AtomicI64::new(expires_at),
        }
    }

    pub fn raw_count(&self) -> u32 {
        unpack_count_gen(self.packed.load(Ordering::Relaxed)).0
    }

    pub fn generation(&self) -> u32 {
        unpack_count_gen(self.packed.load(Ordering::Relaxed)).1
    }

    /// Apply lazy decay up to `current_gen` and return the decayed count.
    ///
    /// One CAS attempt; a lost race is ignored.
    pub fn decay(&self, current_gen: u32, decay_pow: impl Fn(u32) -> f32) -> u32 {
        let old = self.packed.load(Ordering::Relaxed);
        let (count, gen) = unpack_count_gen(old);
        let delta = current_gen.wrapping_sub(gen);
        if delta == 0 {
            return count;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let decayed = (count as f32 * decay_pow(delta)).round().max(0.0) as u32;
        let _ = self.packed.compare_exchange(
            old,
            pack_count_gen(decayed, current_gen),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        decayed
    }

    /// Decay, then record one access. Returns the post-bump count.
    pub fn bump(&self, current_gen: u32, decay_pow: impl Fn(u32) -> f32) -> u32 {
        let decayed = self.decay(current_gen, decay_pow);
        self.packed.fetch_add(COUNT_UNIT, Ordering::Relaxed);
        decayed.saturating_add(1)
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at.load(Ordering::Relaxed)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        let at = self.expires_at();
        at != 0 && at <= now
    }

    /// Extend the expiry (refresh-on-get).
    pub fn refresh(&self, new_expiry: i64) {
        self.expires_at.store(new_expiry, Ordering::Relaxed);
    }
}

/// One L1 slot. Ghosts coexist with real entries in the same shard; a key
/// is present as at most one of these.
#[derive(Debug)]
pub enum CacheSlot<E> {
    /// Neither GDSF nor TTL configured - zero metadata bytes.
    Plain { entity: Arc<E> },
    /// TTL-only: one expiry timestamp. Atomic so refresh-on-get can run
    /// under a shared lock.
    Timed { entity: Arc<E>, expires_at: AtomicI64 },
    /// Full GDSF metadata plus the memory charge fixed at insertion.
    Scored { entity: Arc<E>, bytes: u32, meta: GdsfMeta },
    /// Admission-control placeholder counting misses for its key.
    Ghost { estimated_bytes: u32, meta: GdsfMeta },
}

impl<E> CacheSlot<E> {
    pub fn entity(&self) -> Option<&Arc<E>> {
        match self {
            Self::Plain { entity }
            | Self::Timed { entity, .. }
            | Self::Scored { entity, .. } => Some(entity),
            Self::Ghost { .. } => None,
        }
    }

    pub const fn is_ghost(&self) -> bool {
        matches!(self, Self::Ghost { .. })
    }

    /// Bytes charged against the memory budget for this slot.
    pub fn charged_bytes(&self) -> usize {
        match self {
            Self::Scored { bytes, .. } => *bytes as usize,
            Self::Ghost { .. } => super::GHOST_OVERHEAD_BYTES,
            _ => 0,
        }
    }

    pub fn gdsf_meta(&self) -> Option<&GdsfMeta> {
        match self {
            Self::Scored { meta, .. } | Self::Ghost { meta, .. } => Some(meta),
            _ => None,
        }
    }

    /// Expiry check across slot shapes; `Plain` and `Ghost` never expire.
    pub fn is_expired(&self, now: i64) -> bool {
        match self {
            Self::Timed { expires_at, .. } => {
                let at = expires_at.load(Ordering::Relaxed);
                at != 0 && at <= now
            }
            Self::Scored { meta, .. } => meta.is_expired(now),
            _ => false,
        }
    }

    pub fn refresh_expiry(&self, new_expiry: i64) {
        match self {
            Self::Timed { expires_at, .. } => {
                expires_at.store(new_expiry, Ordering::Relaxed);
            }
            Self::Scored { meta, .. } => meta.refresh(new_expiry),
            _ => {}
        }
    }
}
