//! List layer: paginated query caching over a repository.
//!
//! Sits on top of the tier chain. Reads check the L1 page store, then the
//! L2 page keys, then build the page from the database. Writes intercept
//! the repository's CRUD operations to append modification-log events and
//! to run selective L2 group invalidation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use relais_error::{Result, SerializeError};

use crate::config::{CacheConfig, L2Format};
use crate::db::{DbProvider, FieldUpdate};
use crate::entity::{Entity, EntityMapping};
use crate::l2::L2Cache;
use crate::list::{
    build_list_sql, extract_cursor, group_key, ListBoundsHeader, ListCache, ListDescriptor,
    ListPage, ListQuery, SortBounds,
};
use crate::clock;

use super::invalidation::{GroupInvalidatable, KeyInvalidatable, ListNotifiable};
use super::repo::{ReadOnly, ReadWrite, Repository};
use super::tier::Tier;

type Page<D> =
    Arc<ListPage<<D as ListDescriptor>::Entity, <D as ListDescriptor>::Filters>>;

/// Repository with a declarative list cache attached.
pub struct ListRepository<D: ListDescriptor, T: Tier<D::Entity>, M = ReadWrite> {
    repo: Repository<D::Entity, T, M>,
    list: Arc<ListCache<D>>,
    db: Arc<dyn DbProvider>,
    l2: Option<L2Cache>,
    cfg: CacheConfig,
}

impl<D: ListDescriptor, T: Tier<D::Entity>> ListRepository<D, T, ReadWrite> {
    /// Attach a list cache to an assembled repository. `db` is used for
    /// page queries; `l2` enables the L2 page store when the
    /// configuration has L2.
    pub fn new(
        repo: Repository<D::Entity, T, ReadWrite>,
        db: Arc<dyn DbProvider>,
        l2: Option<L2Cache>,
        cfg: CacheConfig,
    ) -> Self {
        let ttl_nanos = if cfg.has_l1_ttl() {
            clock::duration_nanos(cfg.l1_ttl)
        } else {
            0
        };
        Self {
            repo,
            list: Arc::new(ListCache::new(cfg.l1_shard_count_log2.min(6), ttl_nanos)),
            db,
            l2: cfg.has_l2().then_some(l2).flatten(),
            cfg,
        }
    }

    pub fn into_read_only(self) -> ListRepository<D, T, ReadOnly> {
        ListRepository {
            repo: self.repo.into_read_only(),
            list: self.list,
            db: self.db,
            l2: self.l2,
            cfg: self.cfg,
        }
    }
}

impl<D: ListDescriptor, T: Tier<D::Entity>, M: Send + Sync + 'static> ListRepository<D, T, M> {
    fn name(&self) -> &'static str {
        D::Entity::NAME
    }

    fn l2_page_key(&self, cache_key: &str) -> String {
        format!("{}:dlist:p:{}", self.name(), cache_key)
    }

    /// One tracking set per (filter group, sort field): pages bounded on
    /// different sort columns cannot share a selective-invalidation set,
    /// since the script compares one sort value against every page.
    fn l2_group_key(&self, group: &str, sort_field: usize) -> String {
        format!("{}:dlist:g:{}:s{}", self.name(), group, sort_field)
    }

    fn l2_master_key(&self) -> String {
        format!("{}:dlist_groups", self.name())
    }

    fn refresh(&self) -> Option<Duration> {
        self.cfg.l2_refresh_on_get.then_some(self.cfg.l2_ttl)
    }

    fn uses_binary(&self) -> bool {
        self.cfg.l2_format == L2Format::Binary && D::Entity::SUPPORTS_BINARY
    }

    // =========================================================================
    // Page payload codecs
    // =========================================================================

    fn encode_items(&self, items: &[D::Entity], binary: bool) -> Result<Vec<u8>> {
        if binary {
            let mut buf = Vec::with_capacity(items.len() * 64 + 4);
            buf.extend_from_slice(&u32::try_from(items.len()).unwrap_or(u32::MAX).to_le_bytes());
            for item in items {
                let bin = item.to_binary()?;
                buf.extend_from_slice(&u32::try_from(bin.len()).unwrap_or(u32::MAX).to_le_bytes());
                buf.extend_from_slice(&bin);
            }
            Ok(buf)
        } else {
            let mut json = String::with_capacity(items.len() * 64 + 2);
            json.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    json.push(',');
                }
                json.push_str(&item.to_json()?);
            }
            json.push(']');
            Ok(json.into_bytes())
        }
    }

    fn decode_items(&self, payload: &[u8]) -> Result<Vec<D::Entity>> {
        if self.uses_binary() {
            let err = || SerializeError::Binary { message: "truncated list payload".to_string() };
            let mut rest = payload;
            let mut take = |n: usize| -> Result<&[u8]> {
                if rest.len() < n {
                    return Err(err().into());
                }
                let (head, tail) = rest.split_at(n);
                rest = tail;
                Ok(head)
            };
            let count = u32::from_le_bytes(take(4)?.try_into().map_err(|_| err())?);
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let len = u32::from_le_bytes(take(4)?.try_into().map_err(|_| err())?) as usize;
                items.push(D::Entity::from_binary(take(len)?)?);
            }
            Ok(items)
        } else {
            let values: Vec<serde_json::Value> = serde_json::from_slice(payload)
                .map_err(|e| SerializeError::Json { message: e.to_string() })?;
            values
                .iter()
                .map(|v| D::Entity::from_json(&v.to_string()))
                .collect()
        }
    }

    /// Sort bounds of a page. A non-first cursor page is anchored at its
    /// cursor value rather than its first item: the page owns the whole
    /// interval after the cursor, and an entity landing in the gap
    /// between the cursor and the first item belongs to this page.
    fn page_bounds(&self, items: &[D::Entity], query: &ListQuery<D::Filters>) -> SortBounds {
        let cursor_anchor = match &query.pagination {
            crate::list::Pagination::Cursor(c) => Some(c.sort_value),
            crate::list::Pagination::Offset(_) => None,
        };
        if items.is_empty() {
            return match cursor_anchor {
                Some(anchor) => SortBounds::new(anchor, anchor),
                None => SortBounds::default(),
            };
        }
        let first = cursor_anchor
            .unwrap_or_else(|| D::sort_value(&items[0], query.sort.field));
        SortBounds::new(first, D::sort_value(&items[items.len() - 1], query.sort.field))
    }

    fn page_cursor(&self, items: &[D::Entity], query: &ListQuery<D::Filters>) -> Option<String> {
        if items.is_empty() || items.len() < query.limit as usize {
            return None;
        }
        Some(extract_cursor::<D>(&items[items.len() - 1], query.sort).encode())
    }

    fn make_page(
        &self,
        query: &ListQuery<D::Filters>,
        items: Vec<D::Entity>,
        cost_us: f32,
    ) -> (Vec<D::Entity>, Option<String>, SortBounds, f32) {
        let bounds = self.page_bounds(&items, query);
        let cursor = self.page_cursor(&items, query);
        (items, cursor, bounds, cost_us)
    }

    // =========================================================================
    // Query path
    // =========================================================================

    /// Execute a paginated list query with L1/L2 caching.
    pub async fn query(&self, query: &ListQuery<D::Filters>) -> Result<Page<D>> {
        if self.cfg.has_l1() {
            if let Some(page) = self.list.get(&query.cache_key) {
                self.repo.counters().list_l1_hits.increment();
                return Ok(page);
            }
            self.repo.counters().list_l1_misses.increment();
        }

        let started = Instant::now();

        if let Some(l2) = &self.l2 {
            let page_key = self.l2_page_key(&query.cache_key);
            if let Some(payload) = l2.get_page(&page_key, self.refresh()).await {
                let body = ListBoundsHeader::strip(&payload);
                match self.decode_items(body) {
                    Ok(items) => {
                        self.repo.counters().list_l2_hits.increment();
                        #[allow(clippy::cast_precision_loss)]
                        let cost_us = started.elapsed().as_micros() as f32;
                        return Ok(self.store_l1(query, items, cost_us));
                    }
                    Err(e) => {
                        tracing::warn!(page_key = %page_key, error = %e, "malformed L2 list page; dropping");
                        l2.del(&page_key).await;
                    }
                }
            }
            self.repo.counters().list_l2_misses.increment();
        }

        // Cache miss: build the page from the database.
        let (sql, params) = build_list_sql::<D>(query);
        let rows = self.db.query_dyn(&sql, &params).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(D::Entity::from_row(row)?);
        }
        #[allow(clippy::cast_precision_loss)]
        let cost_us = started.elapsed().as_micros() as f32;

        if let Some(l2) = &self.l2 {
            let bounds = self.page_bounds(&items, query);
            let header = ListBoundsHeader {
                bounds,
                desc: query.sort.direction.is_desc(),
                first_page: query.pagination.is_first_page(),
                incomplete: items.len() < query.limit as usize,
                cursor_mode: query.pagination.is_cursor(),
            };
            match self.encode_items(&items, self.uses_binary()) {
                Ok(body) => {
                    let mut payload = header.encode().to_vec();
                    payload.extend_from_slice(&body);
                    let page_key = self.l2_page_key(&query.cache_key);
                    let l2_group = self.l2_group_key(&query.group_key, query.sort.field);
                    l2.set_page(&page_key, &l2_group, payload, self.cfg.l2_ttl).await;
                    l2.register_group(&self.l2_master_key(), &l2_group, query.sort.field)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "list page serialization for L2 failed");
                }
            }
        }

        Ok(self.store_l1(query, items, cost_us))
    }

    fn store_l1(&self, query: &ListQuery<D::Filters>, items: Vec<D::Entity>, cost_us: f32) -> Page<D> {
        let (items, cursor, bounds, cost_us) = self.make_page(query, items, cost_us);
        if self.cfg.has_l1() {
            self.list.put(query, items, cursor, bounds, cost_us)
        } else {
            let incomplete = items.len() < query.limit as usize;
            Arc::new(ListPage {
                items,
                next_cursor: cursor,
                bounds,
                sort: query.sort,
                first_page: query.pagination.is_first_page(),
                incomplete,
                cursor_mode: query.pagination.is_cursor(),
                filters: query.filters.clone(),
                created_at: clock::precise_nanos(),
                cost_us,
            })
        }
    }

    /// List query returning the JSON array serialization.
    pub async fn query_as_json(&self, query: &ListQuery<D::Filters>) -> Result<String> {
        // L2 JSON payloads can be served raw, header stripped.
        if !self.uses_binary() && !self.cfg.has_l1() {
            if let Some(l2) = &self.l2 {
                let page_key = self.l2_page_key(&query.cache_key);
                if let Some(payload) = l2.get_page(&page_key, self.refresh()).await {
                    let body = ListBoundsHeader::strip(&payload);
                    if let Ok(json) = std::str::from_utf8(body) {
                        self.repo.counters().list_l2_hits.increment();
                        return Ok(json.to_string());
                    }
                    l2.del(&page_key).await;
                }
            }
        }
        let page = self.query(query).await?;
        self.encode_json(&page.items)
    }

    fn encode_json(&self, items: &[D::Entity]) -> Result<String> {
        let mut json = String::with_capacity(items.len() * 64 + 2);
        json.push('[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                json.push(',');
            }
            json.push_str(&item.to_json()?);
        }
        json.push(']');
        Ok(json)
    }

    /// List query returning the compact binary page encoding.
    pub async fn query_as_binary(&self, query: &ListQuery<D::Filters>) -> Result<Vec<u8>> {
        if !D::Entity::SUPPORTS_BINARY {
            return Err(SerializeError::BinaryUnsupported.into());
        }
        if self.uses_binary() && !self.cfg.has_l1() {
            if let Some(l2) = &self.l2 {
                let page_key = self.l2_page_key(&query.cache_key);
                if let Some(payload) = l2.get_page(&page_key, self.refresh()).await {
                    self.repo.counters().list_l2_hits.increment();
                    return Ok(ListBoundsHeader::strip(&payload).to_vec());
                }
            }
        }
        let page = self.query(query).await?;
        self.encode_items(&page.items, true)
    }

    // =========================================================================
    // Entity reads - delegate to the repository.
    // =========================================================================

    pub async fn find(&self, key: &<D::Entity as Entity>::Key) -> Result<Option<Arc<D::Entity>>> {
        self.repo.find(key).await
    }

    pub async fn find_as_json(&self, key: &<D::Entity as Entity>::Key) -> Result<Option<String>> {
        self.repo.find_as_json(key).await
    }

    pub async fn find_as_binary(
        &self,
        key: &<D::Entity as Entity>::Key,
    ) -> Result<Option<Vec<u8>>> {
        self.repo.find_as_binary(key).await
    }

    /// Drop a key from the entity cache tiers. The L1 list cache relies
    /// on lazy modification-log invalidation and is not touched.
    pub async fn invalidate(&self, key: &<D::Entity as Entity>::Key) {
        self.repo.invalidate(key).await;
    }

    /// Drop the key from the in-process entity cache only.
    pub fn evict_l1(&self, key: &<D::Entity as Entity>::Key) {
        self.repo.evict_l1(key);
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Sweep one shard of the entity cache and one chunk of the list
    /// cache.
    pub fn sweep(&self) -> bool {
        let entity_cleaned = self.repo.sweep();
        self.list.sweep() || entity_cleaned
    }

    pub fn try_sweep(&self) -> bool {
        let entity_cleaned = self.repo.try_sweep();
        self.list.sweep() || entity_cleaned
    }

    /// Full scan of both caches.
    pub fn purge(&self) -> usize {
        self.repo.purge() + self.list.purge()
    }

    pub fn l1_len(&self) -> usize {
        self.repo.l1_len()
    }

    pub fn list_len(&self) -> usize {
        self.list.len()
    }

    pub fn pending_modifications(&self) -> usize {
        self.list.pending_modifications()
    }

    pub fn warmup(&self) {
        self.repo.warmup();
        tracing::debug!(repo = self.name(), "list cache primed");
    }

    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.repo.metrics()
    }

    /// Invalidate every L2 list group of this repository (coarse).
    pub async fn invalidate_all_list_groups(&self) -> usize {
        match &self.l2 {
            Some(l2) => l2.invalidate_all_list_groups(&self.l2_master_key()).await,
            None => 0,
        }
    }

    // =========================================================================
    // L2 selective invalidation
    // =========================================================================

    /// (group, sort-field, value) triples a create/delete invalidates.
    fn l2_targets_for(&self, entity: &D::Entity) -> Vec<(String, i64)> {
        let mut targets = Vec::new();
        for filters in D::visible_filter_records(entity) {
            let group = group_key::<D>(&filters);
            for field in 0..D::SORT_COLUMNS.len() {
                targets.push((
                    self.l2_group_key(&group, field),
                    D::sort_value(entity, field),
                ));
            }
        }
        targets
    }

    async fn l2_invalidate_created(&self, entity: &D::Entity) {
        let Some(l2) = &self.l2 else { return };
        for (group, value) in self.l2_targets_for(entity) {
            l2.invalidate_group_selective(&group, value).await;
        }
    }

    async fn l2_invalidate_deleted(&self, entity: &D::Entity) {
        self.l2_invalidate_created(entity).await;
    }

    async fn l2_invalidate_updated(&self, old: &D::Entity, new: &D::Entity) {
        let Some(l2) = &self.l2 else { return };
        let old_records = D::visible_filter_records(old);
        let new_records = D::visible_filter_records(new);

        for filters in &old_records {
            let group = group_key::<D>(filters);
            let stayed = new_records.contains(filters);
            for field in 0..D::SORT_COLUMNS.len() {
                let gk = self.l2_group_key(&group, field);
                if stayed {
                    l2.invalidate_group_selective_update(
                        &gk,
                        D::sort_value(old, field),
                        D::sort_value(new, field),
                    )
                    .await;
                } else {
                    // Left the group: delete semantics with the old value.
                    l2.invalidate_group_selective(&gk, D::sort_value(old, field)).await;
                }
            }
        }
        for filters in new_records.iter().filter(|f| !old_records.contains(f)) {
            let group = group_key::<D>(filters);
            for field in 0..D::SORT_COLUMNS.len() {
                let gk = self.l2_group_key(&group, field);
                l2.invalidate_group_selective(&gk, D::sort_value(new, field)).await;
            }
        }
    }

    fn spawn_l2_invalidation(&self, targets: Vec<(String, i64)>) {
        let Some(l2) = self.l2.clone() else { return };
        tokio::spawn(async move {
            for (group, value) in targets {
                l2.invalidate_group_selective(&group, value).await;
            }
        });
    }
}

impl<D: ListDescriptor, T: Tier<D::Entity>> ListRepository<D, T, ReadWrite> {
    /// Insert, notify the list caches, then fire cross-invalidation.
    pub async fn insert(&self, entity: D::Entity) -> Result<Arc<D::Entity>> {
        let inserted = self.repo.tier().insert(entity).await?;
        self.list.on_entity_created(&inserted);
        self.l2_invalidate_created(&inserted).await;
        self.repo.fire_created(&inserted).await;
        Ok(inserted)
    }

    pub async fn update(
        &self,
        key: &<D::Entity as Entity>::Key,
        entity: D::Entity,
    ) -> Result<bool> {
        let old = self.repo.tier().find(key).await?;
        let new = Arc::new(entity.clone());
        let ok = self.repo.tier().update(key, entity).await?;
        if ok {
            match &old {
                Some(old_entity) => {
                    self.list.on_entity_updated(old_entity, &new);
                    self.l2_invalidate_updated(old_entity, &new).await;
                }
                None => {
                    self.list.on_entity_created(&new);
                    self.l2_invalidate_created(&new).await;
                }
            }
            self.repo.fire_updated(old.as_ref(), &new).await;
        }
        Ok(ok)
    }

    pub async fn patch(
        &self,
        key: &<D::Entity as Entity>::Key,
        updates: &[FieldUpdate],
    ) -> Result<Option<Arc<D::Entity>>> {
        let old = self.repo.tier().find(key).await?;
        let result = self.repo.tier().patch(key, updates).await?;
        if let Some(new) = &result {
            match &old {
                Some(old_entity) => {
                    self.list.on_entity_updated(old_entity, new);
                    self.l2_invalidate_updated(old_entity, new).await;
                }
                None => {
                    self.list.on_entity_created(new);
                    self.l2_invalidate_created(new).await;
                }
            }
            self.repo.fire_updated(old.as_ref(), new).await;
        }
        Ok(result)
    }

    pub async fn erase(&self, key: &<D::Entity as Entity>::Key) -> Result<u64> {
        let old = self.repo.tier().find(key).await?;
        let affected = self.repo.tier().erase_with_hint(key, old.clone()).await?;
        if affected > 0 {
            if let Some(old_entity) = &old {
                self.list.on_entity_deleted(old_entity);
                self.l2_invalidate_deleted(old_entity).await;
                self.repo.fire_deleted(old_entity).await;
            }
        }
        Ok(affected)
    }
}

// =============================================================================
// Cross-invalidation target surfaces
// =============================================================================

#[async_trait]
impl<D: ListDescriptor, T: Tier<D::Entity>, M: Send + Sync + 'static>
    KeyInvalidatable<<D::Entity as Entity>::Key> for ListRepository<D, T, M>
{
    async fn invalidate_key(&self, key: &<D::Entity as Entity>::Key) {
        self.repo.tier().invalidate(key).await;
    }
}

#[async_trait]
impl<D: ListDescriptor, T: Tier<D::Entity>, M: Send + Sync + 'static> ListNotifiable<D::Entity>
    for ListRepository<D, T, M>
{
    async fn notify_created(&self, entity: &D::Entity) {
        self.list.on_entity_created(entity);
        self.spawn_l2_invalidation(self.l2_targets_for(entity));
    }

    async fn notify_updated(&self, old: &D::Entity, new: &D::Entity) {
        self.list.on_entity_updated(old, new);
        // Fire-and-forget: single-value invalidations for both images.
        let mut targets = self.l2_targets_for(old);
        targets.extend(self.l2_targets_for(new));
        self.spawn_l2_invalidation(targets);
    }

    async fn notify_deleted(&self, entity: &D::Entity) {
        self.list.on_entity_deleted(entity);
        self.spawn_l2_invalidation(self.l2_targets_for(entity));
    }
}

#[async_trait]
impl<D: ListDescriptor, T: Tier<D::Entity>, M: Send + Sync + 'static> GroupInvalidatable
    for ListRepository<D, T, M>
{
    async fn invalidate_group_for(&self, group_key: &str, sort_value: i64) {
        // L1: drop every page of the group.
        self.list.invalidate_prefix(group_key);
        // L2: selective per sort-field tracking set.
        if let Some(l2) = &self.l2 {
            for field in 0..D::SORT_COLUMNS.len() {
                let gk = self.l2_group_key(group_key, field);
                l2.invalidate_group_selective(&gk, sort_value).await;
            }
        }
    }

    async fn invalidate_all_groups(&self) {
        self.list.clear();
        self.invalidate_all_list_groups().await;
    }
}
