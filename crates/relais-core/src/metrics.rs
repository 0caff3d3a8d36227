//! Striped cache counters.
//!
//! Hot paths increment a slot picked from the calling thread's identity;
//! totals are summed across slots off the read path.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::OnceLock;

const SLOTS: usize = 8;
const MASK: usize = SLOTS - 1;

fn slot_index() -> usize {
    static HASHER: OnceLock<RandomState> = OnceLock::new();
    let state = HASHER.get_or_init(RandomState::new);
    let mut h = state.build_hasher();
    std::thread::current().id().hash(&mut h);
    (std::hash::Hasher::finish(&h) as usize) & MASK
}

/// Cache-line-aligned atomic slot.
#[repr(align(64))]
#[derive(Default)]
struct Slot {
    value: AtomicU64,
}

/// Striped atomic counter - 8 cache-line-aligned slots to minimize
/// contention. Total footprint ~512 bytes per counter.
#[derive(Default)]
pub struct StripedCounter {
    slots: [Slot; SLOTS],
}

impl StripedCounter {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: Slot = Slot { value: AtomicU64::new(0) };
        Self { slots: [ZERO; SLOTS] }
    }

    pub fn increment(&self) {
        self.slots[slot_index()].value.fetch_add(1, Ordering::Relaxed);
    }

    /// Sum across slots. Not intended for hot paths.
    pub fn load(&self) -> u64 {
        self.slots.iter().map(|s| s.value.load(Ordering::Relaxed)).sum()
    }

    pub fn reset(&self) {
        for s in &self.slots {
            s.value.store(0, Ordering::Relaxed);
        }
    }
}

/// Striped signed byte counter for L1 memory accounting.
/// Increment on insert, decrement on removal; the total is a sum across
/// slots and may be transiently read mid-update (rare, write-path only).
#[derive(Default)]
pub struct StripedGauge {
    slots: [GaugeSlot; SLOTS],
}

#[repr(align(64))]
#[derive(Default)]
struct GaugeSlot {
    value: AtomicI64,
}

impl StripedGauge {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: GaugeSlot = GaugeSlot { value: AtomicI64::new(0) };
        Self { slots: [ZERO; SLOTS] }
    }

    pub fn add(&self, delta: i64) {
        self.slots[slot_index()].value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn load(&self) -> i64 {
        self.slots.iter().map(|s| s.value.load(Ordering::Relaxed)).sum()
    }

    pub fn reset(&self) {
        for s in &self.slots {
            s.value.store(0, Ordering::Relaxed);
        }
    }
}

/// Hit/miss counter pairs for one repository.
#[derive(Default)]
pub struct RepoCounters {
    pub l1_hits: StripedCounter,
    pub l1_misses: StripedCounter,
    pub l2_hits: StripedCounter,
    pub l2_misses: StripedCounter,
    pub list_l1_hits: StripedCounter,
    pub list_l1_misses: StripedCounter,
    pub list_l2_hits: StripedCounter,
    pub list_l2_misses: StripedCounter,
}

impl RepoCounters {
    pub const fn new() -> Self {
        Self {
            l1_hits: StripedCounter::new(),
            l1_misses: StripedCounter::new(),
            l2_hits: StripedCounter::new(),
            l2_misses: StripedCounter::new(),
            list_l1_hits: StripedCounter::new(),
            list_l1_misses: StripedCounter::new(),
            list_l2_hits: StripedCounter::new(),
            list_l2_misses: StripedCounter::new(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            l1_hits: self.l1_hits.load(),
            l1_misses: self.l1_misses.load(),
            l2_hits: self.l2_hits.load(),
            l2_misses: self.l2_misses.load(),
            list_l1_hits: self.list_l1_hits.load(),
            list_l1_misses: self.list_l1_misses.load(),
            list_l2_hits: self.list_l2_hits.load(),
            list_l2_misses: self.list_l2_misses.load(),
        }
    }
}

/// Immutable snapshot of all cache metrics for one repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub list_l1_hits: u64,
    pub list_l1_misses: u64,
    pub list_l2_hits: u64,
    pub list_l2_misses: u64,
}

impl MetricsSnapshot {
    fn ratio(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    pub fn l1_hit_ratio(&self) -> f64 {
        Self::ratio(self.l1_hits, self.l1_misses)
    }

    pub fn l2_hit_ratio(&self) -> f64 {
        Self::ratio(self.l2_hits, self.l2_misses)
    }

    pub fn list_l1_hit_ratio(&self) -> f64 {
        Self::ratio(self.list_l1_hits, self.list_l1_misses)
    }

    pub fn list_l2_hit_ratio(&self) -> f64 {
        Self::ratio(self.list_l2_hits, self.list_l2_misses)
    }
}
