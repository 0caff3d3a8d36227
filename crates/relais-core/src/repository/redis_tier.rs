//! L2 tier: shared Redis cache on top of the database base.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relais_error::Result;

use crate::config::{CacheConfig, L2Format, UpdateStrategy};
use crate::db::FieldUpdate;
use crate::entity::EntityMapping;
use crate::l2::L2Cache;
use crate::metrics::RepoCounters;

use super::tier::Tier;

/// Redis-backed tier. Serialization format follows `l2_format`, falling
/// back to JSON when the entity lacks binary support.
pub struct RedisTier<E: EntityMapping, B: Tier<E>> {
    base: B,
    l2: L2Cache,
    cfg: CacheConfig,
    counters: Arc<RepoCounters>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: EntityMapping, B: Tier<E>> RedisTier<E, B> {
    pub fn new(base: B, l2: L2Cache, cfg: CacheConfig, counters: Arc<RepoCounters>) -> Self {
        Self { base, l2, cfg, counters, _marker: PhantomData }
    }

    fn refresh(&self) -> Option<Duration> {
        self.cfg.l2_refresh_on_get.then_some(self.cfg.l2_ttl)
    }

    fn uses_binary(&self) -> bool {
        self.cfg.l2_format == L2Format::Binary && E::SUPPORTS_BINARY
    }

    async fn populate(&self, entity: &E) {
        let key = E::l2_key(&entity.key());
        self.l2
            .set_entity(&key, entity, self.cfg.l2_format, self.cfg.l2_ttl)
            .await;
    }

    async fn evict(&self, key: &E::Key) {
        self.l2.del(&E::l2_key(key)).await;
    }
}

#[async_trait]
impl<E: EntityMapping, B: Tier<E>> Tier<E> for RedisTier<E, B> {
    async fn find(&self, key: &E::Key) -> Result<Option<Arc<E>>> {
        let l2_key = E::l2_key(key);
        if let Some(entity) = self
            .l2
            .get_entity::<E>(&l2_key, self.cfg.l2_format, self.refresh())
            .await
        {
            self.counters.l2_hits.increment();
            return Ok(Some(Arc::new(entity)));
        }
        self.counters.l2_misses.increment();

        let found = self.base.find(key).await?;
        if let Some(entity) = &found {
            self.populate(entity).await;
        }
        Ok(found)
    }

    async fn find_json(&self, key: &E::Key) -> Result<Option<String>> {
        // JSON payloads can be served without constructing the entity.
        if !self.uses_binary() {
            let l2_key = E::l2_key(key);
            let raw = match self.refresh() {
                Some(ttl) => self.l2.get_raw_refresh(&l2_key, ttl).await,
                None => self.l2.get_raw(&l2_key).await,
            };
            if let Some(bytes) = raw {
                if let Ok(json) = String::from_utf8(bytes) {
                    self.counters.l2_hits.increment();
                    return Ok(Some(json));
                }
                // Not UTF-8: malformed entry, drop and fall through.
                self.l2.del(&l2_key).await;
            }
            // Miss accounting happens in the find() fallback below.
        }
        match self.find(key).await? {
            Some(entity) => Ok(Some(entity.to_json()?)),
            None => Ok(None),
        }
    }

    async fn find_binary(&self, key: &E::Key) -> Result<Option<Vec<u8>>> {
        if self.uses_binary() {
            let l2_key = E::l2_key(key);
            let raw = match self.refresh() {
                Some(ttl) => self.l2.get_raw_refresh(&l2_key, ttl).await,
                None => self.l2.get_raw(&l2_key).await,
            };
            if let Some(bytes) = raw {
                self.counters.l2_hits.increment();
                return Ok(Some(bytes));
            }
            self.counters.l2_misses.increment();

            let found = self.base.find(key).await?;
            return match found {
                Some(entity) => {
                    self.populate(&entity).await;
                    Ok(Some(entity.to_binary()?))
                }
                None => Ok(None),
            };
        }
        match self.find(key).await? {
            Some(entity) => Ok(Some(entity.to_binary()?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, entity: E) -> Result<Arc<E>> {
        let inserted = self.base.insert(entity).await?;
        self.populate(&inserted).await;
        Ok(inserted)
    }

    async fn update(&self, key: &E::Key, entity: E) -> Result<bool> {
        let populate = entity.clone();
        let ok = self.base.update(key, entity).await?;
        if ok {
            match self.cfg.update_strategy {
                UpdateStrategy::InvalidateAndLazyReload => self.evict(key).await,
                UpdateStrategy::PopulateImmediately => self.populate(&populate).await,
            }
        }
        Ok(ok)
    }

    async fn patch(&self, key: &E::Key, updates: &[FieldUpdate]) -> Result<Option<Arc<E>>> {
        // Same post-write sequence as update: evict only after the row
        // actually changed. A failed or no-op patch leaves L2 untouched.
        let result = self.base.patch(key, updates).await?;
        if result.is_some() {
            self.evict(key).await;
        }
        Ok(result)
    }

    async fn erase_with_hint(&self, key: &E::Key, mut hint: Option<Arc<E>>) -> Result<u64> {
        // Near-free partition hint from L2 when L1 had nothing.
        if E::DELETE_BY_PK_WITH_HINT.is_some() && hint.is_none() {
            hint = self
                .l2
                .get_entity::<E>(&E::l2_key(key), self.cfg.l2_format, None)
                .await
                .map(Arc::new);
        }
        let affected = self.base.erase_with_hint(key, hint).await?;
        self.evict(key).await;
        Ok(affected)
    }

    async fn invalidate(&self, key: &E::Key) {
        self.evict(key).await;
        self.base.invalidate(key).await;
    }

    fn evict_l1(&self, key: &E::Key) {
        self.base.evict_l1(key);
    }

    fn sweep(&self) -> bool {
        self.base.sweep()
    }

    fn try_sweep(&self) -> bool {
        self.base.try_sweep()
    }

    fn purge(&self) -> usize {
        self.base.purge()
    }

    fn len(&self) -> usize {
        self.base.len()
    }

    fn warmup(&self) {
        self.base.warmup();
    }
}
