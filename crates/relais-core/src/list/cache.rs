//! L1 list-page store (ChunkMap).
//!
//! Pages are held behind `Arc` so readers keep a page alive while a
//! concurrent sweep removes it from the map. A page served from the map
//! is validated lazily against the modification log: if any event logged
//! after the page's creation affects it (filter tags match and the sort
//! value falls inside the page's bounds under its flags), the page is
//! removed and the caller re-queries.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock;

use super::bounds::{ListBoundsHeader, SortBounds};
use super::descriptor::ListDescriptor;
use super::query::{ListQuery, SortSpec};
use super::tracker::{EventKind, ModEvent, ModificationTracker};

/// One cached result page.
#[derive(Debug)]
pub struct ListPage<E, F> {
    pub items: Vec<E>,
    pub next_cursor: Option<String>,
    pub bounds: SortBounds,
    pub sort: SortSpec,
    pub first_page: bool,
    pub incomplete: bool,
    pub cursor_mode: bool,
    pub filters: F,
    /// Cached-clock timestamp at creation; drives lazy validation.
    pub created_at: i64,
    /// Microseconds it took to construct this page on miss.
    pub cost_us: f32,
}

impl<E, F> ListPage<E, F> {
    /// Header describing this page for the L2 store.
    pub fn header(&self) -> ListBoundsHeader {
        ListBoundsHeader {
            bounds: self.bounds,
            desc: self.sort.direction.is_desc(),
            first_page: self.first_page,
            incomplete: self.incomplete,
            cursor_mode: self.cursor_mode,
        }
    }
}

/// Sharded page map plus the modification log that invalidates it.
pub struct ListCache<D: ListDescriptor> {
    chunks: Vec<RwLock<HashMap<String, Arc<ListPage<D::Entity, D::Filters>>>>>,
    mask: usize,
    hasher: RandomState,
    sweep_cursor: AtomicUsize,
    tracker: ModificationTracker<D::Filters>,
    ttl_nanos: i64,
}

impl<D: ListDescriptor> ListCache<D> {
    /// `chunk_count_log2` chunks (max 64 total); `ttl_nanos` 0 disables
    /// page expiry.
    pub fn new(chunk_count_log2: u8, ttl_nanos: i64) -> Self {
        let count = 1usize << chunk_count_log2.min(6);
        Self {
            chunks: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
            mask: count - 1,
            hasher: RandomState::new(),
            sweep_cursor: AtomicUsize::new(0),
            tracker: ModificationTracker::new(count),
            ttl_nanos,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn chunk_of(&self, cache_key: &str) -> usize {
        let mut h = self.hasher.build_hasher();
        cache_key.hash(&mut h);
        (std::hash::Hasher::finish(&h) as usize) & self.mask
    }

    fn expired(&self, page: &ListPage<D::Entity, D::Filters>, now: i64) -> bool {
        self.ttl_nanos > 0 && page.created_at + self.ttl_nanos <= now
    }

    /// Does `event` affect `page`? Filter tags must match; then the sort
    /// value (for the page's own sort field) is tested against the page
    /// bounds under its direction/first-page/incomplete/pagination flags.
    fn affects(page: &ListPage<D::Entity, D::Filters>, event: &ModEvent<D::Filters>) -> bool {
        if event.tags != page.filters {
            return false;
        }
        if !page.bounds.valid {
            // A page without bounds (empty result) can start matching as
            // soon as anything with its filters changes.
            return true;
        }
        let header = page.header();
        let field = page.sort.field;
        let pick = |sorts: &Option<Vec<i64>>| sorts.as_ref().and_then(|v| v.get(field).copied());
        match event.kind {
            EventKind::Created => {
                pick(&event.new_sorts).is_some_and(|v| header.affected_by(v))
            }
            EventKind::Deleted => {
                pick(&event.old_sorts).is_some_and(|v| header.affected_by(v))
            }
            EventKind::Updated => match (pick(&event.old_sorts), pick(&event.new_sorts)) {
                (Some(old), Some(new)) => header.affected_by_update(old, new),
                (Some(v), None) | (None, Some(v)) => header.affected_by(v),
                (None, None) => false,
            },
        }
    }

    /// Fetch a page by cache key, validating it against the modification
    /// log. Invalid or expired pages are removed and reported as misses.
    pub fn get(&self, cache_key: &str) -> Option<Arc<ListPage<D::Entity, D::Filters>>> {
        let chunk = &self.chunks[self.chunk_of(cache_key)];
        let now = clock::cached_nanos();

        let page = {
            let map = chunk.read();
            map.get(cache_key)?.clone()
        };

        let mut invalid = self.expired(&page, now);
        if !invalid && self.tracker.latest() > page.created_at {
            invalid = self
                .tracker
                .events_since(page.created_at)
                .iter()
                .any(|e| Self::affects(&page, e));
        }

        if invalid {
            let mut map = chunk.write();
            // Only remove the exact page we validated.
            if map
                .get(cache_key)
                .is_some_and(|p| Arc::ptr_eq(p, &page))
            {
                map.remove(cache_key);
            }
            return None;
        }
        Some(page)
    }

    /// Insert a freshly built page and return the shared handle.
    pub fn put(
        &self,
        query: &ListQuery<D::Filters>,
        items: Vec<D::Entity>,
        next_cursor: Option<String>,
        bounds: SortBounds,
        cost_us: f32,
    ) -> Arc<ListPage<D::Entity, D::Filters>> {
        let incomplete = items.len() < query.limit as usize;
        let page = Arc::new(ListPage {
            items,
            next_cursor,
            bounds,
            sort: query.sort,
            first_page: query.pagination.is_first_page(),
            incomplete,
            cursor_mode: query.pagination.is_cursor(),
            filters: query.filters.clone(),
            // Precise clock: validation compares this against event
            // timestamps, and the 100 ms cached tick would let a write in
            // the same tick slip past the page.
            created_at: clock::precise_nanos(),
            cost_us,
        });
        let chunk = &self.chunks[self.chunk_of(&query.cache_key)];
        chunk.write().insert(query.cache_key.clone(), page.clone());
        page
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for chunk in &self.chunks {
            chunk.write().clear();
        }
        self.tracker.clear();
    }

    /// Remove every page whose cache key starts with `prefix` (a group
    /// key). Used by group-resolver cross-invalidation.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        for chunk in &self.chunks {
            let mut map = chunk.write();
            let before = map.len();
            map.retain(|key, _| !key.starts_with(prefix));
            removed += before - map.len();
        }
        removed
    }

    // =========================================================================
    // Write notifications
    // =========================================================================

    pub fn on_entity_created(&self, entity: &D::Entity) {
        self.tracker.record(
            EventKind::Created,
            D::filter_tags(entity),
            None,
            Some(Self::all_sorts(entity)),
            clock::precise_nanos(),
        );
    }

    pub fn on_entity_updated(&self, old: &D::Entity, new: &D::Entity) {
        // Filter tags can change on update; log under both tag sets so
        // pages on either side invalidate.
        let old_tags = D::filter_tags(old);
        let new_tags = D::filter_tags(new);
        let now = clock::precise_nanos();
        if old_tags == new_tags {
            self.tracker.record(
                EventKind::Updated,
                new_tags,
                Some(Self::all_sorts(old)),
                Some(Self::all_sorts(new)),
                now,
            );
        } else {
            self.tracker.record(
                EventKind::Deleted,
                old_tags,
                Some(Self::all_sorts(old)),
                None,
                now,
            );
            self.tracker.record(
                EventKind::Created,
                new_tags,
                None,
                Some(Self::all_sorts(new)),
                now,
            );
        }
    }

    pub fn on_entity_deleted(&self, entity: &D::Entity) {
        self.tracker.record(
            EventKind::Deleted,
            D::filter_tags(entity),
            Some(Self::all_sorts(entity)),
            None,
            clock::precise_nanos(),
        );
    }

    fn all_sorts(entity: &D::Entity) -> Vec<i64> {
        (0..D::SORT_COLUMNS.len())
            .map(|i| D::sort_value(entity, i))
            .collect()
    }

    // =========================================================================
    // Sweeping
    // =========================================================================

    fn sweep_chunk(&self, idx: usize) -> usize {
        let now = clock::cached_nanos();
        let events = self.tracker.events_since(i64::MIN);
        let mut oldest_kept = i64::MAX;
        let removed;
        {
            let mut map = self.chunks[idx].write();
            let before = map.len();
            map.retain(|_, page| {
                let dead = self.expired(page, now)
                    || events
                        .iter()
                        .filter(|e| e.at > page.created_at)
                        .any(|e| Self::affects(page, e));
                if !dead {
                    oldest_kept = oldest_kept.min(page.created_at);
                }
                !dead
            });
            removed = before - map.len();
        }
        // Events older than every page this chunk still holds can no
        // longer affect it.
        let cutoff = if oldest_kept == i64::MAX { now } else { oldest_kept };
        self.tracker.drain_chunk(cutoff, idx);
        removed
    }

    /// Sweep the next chunk in cursor order.
    pub fn sweep(&self) -> bool {
        let idx = self.sweep_cursor.fetch_add(1, Ordering::Relaxed) & self.mask;
        self.sweep_chunk(idx) > 0
    }

    /// Sweep all chunks and fully drain the tracker.
    pub fn purge(&self) -> usize {
        let mut removed = 0;
        for idx in 0..self.chunks.len() {
            removed += self.sweep_chunk(idx);
        }
        removed
    }

    /// Pending modification count (test/diagnostic support).
    pub fn pending_modifications(&self) -> usize {
        self.tracker.len()
    }
}
