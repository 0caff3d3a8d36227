//! Modification log consumed by lazy list-page validation.
//!
//! Every entity write appends one event carrying the entity's filter tags
//! and its sort values (one per sort column). Events are retained until
//! every chunk of the page store has observed them: a per-event bitset
//! marks which chunks have checked it, and fully observed events older
//! than the drain cutoff are dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// What kind of write produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// One logged modification.
#[derive(Debug)]
pub struct ModEvent<F> {
    pub kind: EventKind,
    pub tags: F,
    /// Sort values of the pre-image, one per sort column. `None` for
    /// creations.
    pub old_sorts: Option<Vec<i64>>,
    /// Sort values of the post-image. `None` for deletions.
    pub new_sorts: Option<Vec<i64>>,
    /// Cached-clock timestamp of the write.
    pub at: i64,
    /// Bit `i` set once chunk `i` has processed this event.
    seen: AtomicU64,
}

impl<F> ModEvent<F> {
    pub fn mark_seen(&self, chunk: usize) {
        self.seen.fetch_or(1u64 << chunk, Ordering::Relaxed);
    }

    pub fn seen_by_all(&self, full_mask: u64) -> bool {
        self.seen.load(Ordering::Relaxed) & full_mask == full_mask
    }
}

/// Time-ordered modification log with an atomic latest-write timestamp
/// for fast staleness checks.
pub struct ModificationTracker<F> {
    events: Mutex<VecDeque<Arc<ModEvent<F>>>>,
    latest: AtomicI64,
    full_mask: u64,
}

impl<F: Clone> ModificationTracker<F> {
    /// `chunk_count` must match the page store's chunk count (<= 64).
    pub fn new(chunk_count: usize) -> Self {
        debug_assert!(chunk_count >= 1 && chunk_count <= 64);
        let full_mask = if chunk_count == 64 {
            u64::MAX
        } else {
            (1u64 << chunk_count) - 1
        };
        Self {
            events: Mutex::new(VecDeque::new()),
            latest: AtomicI64::new(i64::MIN),
            full_mask,
        }
    }

    pub fn record(
        &self,
        kind: EventKind,
        tags: F,
        old_sorts: Option<Vec<i64>>,
        new_sorts: Option<Vec<i64>>,
        at: i64,
    ) {
        let event = Arc::new(ModEvent {
            kind,
            tags,
            old_sorts,
            new_sorts,
            at,
            seen: AtomicU64::new(0),
        });
        let mut events = self.events.lock();
        events.push_back(event);
        self.latest.store(at, Ordering::Relaxed);
    }

    /// Timestamp of the most recent modification; `i64::MIN` when empty.
    /// Pages created after this need no validation scan.
    pub fn latest(&self) -> i64 {
        self.latest.load(Ordering::Relaxed)
    }

    /// Events logged strictly after `since`, oldest first.
    pub fn events_since(&self, since: i64) -> Vec<Arc<ModEvent<F>>> {
        let events = self.events.lock();
        events.iter().filter(|e| e.at > since).cloned().collect()
    }

    /// Mark every event at-or-before `cutoff` as seen by `chunk`, then
    /// drop fully observed events from the front of the log.
    pub fn drain_chunk(&self, cutoff: i64, chunk: usize) {
        let mut events = self.events.lock();
        for event in events.iter() {
            if event.at <= cutoff {
                event.mark_seen(chunk);
            }
        }
        while let Some(front) = events.front() {
            if front.at <= cutoff && front.seen_by_all(self.full_mask) {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Unconditionally drop events at-or-before `cutoff` (full purge).
    pub fn drain(&self, cutoff: i64) {
        let mut events = self.events.lock();
        while let Some(front) = events.front() {
            if front.at <= cutoff {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.latest.store(i64::MIN, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn latest_tracks_newest_event() {
        let t: ModificationTracker<u8> = ModificationTracker::new(4);
        assert_eq!(t.latest(), i64::MIN);
        t.record(EventKind::Created, 1, None, Some(vec![5]), 100);
        t.record(EventKind::Deleted, 1, Some(vec![5]), None, 200);
        assert_eq!(t.latest(), 200);
    }

    #[test]
    fn events_since_filters_by_timestamp() {
        let t: ModificationTracker<u8> = ModificationTracker::new(4);
        t.record(EventKind::Created, 1, None, Some(vec![1]), 100);
        t.record(EventKind::Created, 2, None, Some(vec![2]), 200);
        let recent = t.events_since(100);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].tags, 2);
    }

    #[test]
    fn drain_requires_all_chunks() {
        let t: ModificationTracker<u8> = ModificationTracker::new(2);
        t.record(EventKind::Created, 1, None, Some(vec![1]), 100);

        t.drain_chunk(150, 0);
        assert_eq!(t.len(), 1, "one chunk is not enough");

        t.drain_chunk(150, 1);
        assert_eq!(t.len(), 0, "both chunks observed the event");
    }

    #[test]
    fn drain_respects_cutoff() {
        let t: ModificationTracker<u8> = ModificationTracker::new(1);
        t.record(EventKind::Created, 1, None, Some(vec![1]), 100);
        t.record(EventKind::Created, 2, None, Some(vec![2]), 300);

        // Cutoff between the two: only the first is dropped.
        t.drain_chunk(200, 0);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn full_drain_ignores_bitset() {
        let t: ModificationTracker<u8> = ModificationTracker::new(8);
        t.record(EventKind::Created, 1, None, Some(vec![1]), 100);
        t.drain(100);
        assert!(t.is_empty());
    }

    #[test]
    fn drain_preserves_order_behind_unseen_events() {
        let t: ModificationTracker<u8> = ModificationTracker::new(2);
        t.record(EventKind::Created, 1, None, Some(vec![1]), 100);
        t.record(EventKind::Created, 2, None, Some(vec![2]), 200);

        // Second event fully seen, first only by chunk 0: nothing pops
        // past the unseen head.
        for chunk in 0..2 {
            for e in t.events_since(150) {
                e.mark_seen(chunk);
            }
        }
        t.drain_chunk(50, 0);
        assert_eq!(t.len(), 2);
    }
}
