//! The repository surface: the assembled tier chain plus declared
//! cross-invalidation rules.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use relais_error::Result;

use crate::cache::GdsfPolicy;
use crate::config::CacheConfig;
use crate::db::{DbProvider, FieldUpdate};
use crate::entity::EntityMapping;
use crate::l2::L2Cache;
use crate::metrics::{MetricsSnapshot, RepoCounters};

use super::db_tier::DbTier;
use super::invalidation::{InvalidationTarget, KeyInvalidatable};
use super::memory_tier::MemoryTier;
use super::redis_tier::RedisTier;
use super::tier::Tier;

/// Typestate marker: write operations available.
pub struct ReadWrite;

/// Typestate marker: `insert`/`update`/`patch`/`erase` do not exist on
/// the type.
pub struct ReadOnly;

/// Uniform repository surface over an assembled tier chain.
///
/// The chain type `T` is fixed at construction from the cache level; the
/// mode marker `M` controls whether write operations exist at all.
pub struct Repository<E: EntityMapping, T: Tier<E>, M = ReadWrite> {
    tier: Arc<T>,
    rules: Vec<Box<dyn InvalidationTarget<E>>>,
    counters: Arc<RepoCounters>,
    _mode: PhantomData<M>,
}

/// Database-only repository.
pub type UncachedRepo<E, M = ReadWrite> = Repository<E, DbTier<E>, M>;
/// RAM -> DB.
pub type L1Repo<E, M = ReadWrite> = Repository<E, MemoryTier<E, DbTier<E>>, M>;
/// Redis -> DB.
pub type L2Repo<E, M = ReadWrite> = Repository<E, RedisTier<E, DbTier<E>>, M>;
/// RAM -> Redis -> DB.
pub type L1L2Repo<E, M = ReadWrite> = Repository<E, MemoryTier<E, RedisTier<E, DbTier<E>>>, M>;

impl<E: EntityMapping> UncachedRepo<E> {
    pub fn uncached(db: Arc<dyn DbProvider>) -> Self {
        Self::from_tier(DbTier::new(db), Arc::new(RepoCounters::new()))
    }
}

impl<E: EntityMapping> L1Repo<E> {
    pub fn l1(db: Arc<dyn DbProvider>, cfg: CacheConfig, policy: Option<Arc<GdsfPolicy>>) -> Self {
        let counters = Arc::new(RepoCounters::new());
        let tier = MemoryTier::new(DbTier::new(db), cfg, policy, counters.clone());
        Self::from_tier(tier, counters)
    }
}

impl<E: EntityMapping> L2Repo<E> {
    pub fn l2(db: Arc<dyn DbProvider>, l2: L2Cache, cfg: CacheConfig) -> Self {
        let counters = Arc::new(RepoCounters::new());
        let tier = RedisTier::new(DbTier::new(db), l2, cfg, counters.clone());
        Self::from_tier(tier, counters)
    }
}

impl<E: EntityMapping> L1L2Repo<E> {
    pub fn l1_l2(
        db: Arc<dyn DbProvider>,
        l2: L2Cache,
        cfg: CacheConfig,
        policy: Option<Arc<GdsfPolicy>>,
    ) -> Self {
        let counters = Arc::new(RepoCounters::new());
        let redis = RedisTier::new(DbTier::new(db), l2, cfg, counters.clone());
        let tier = MemoryTier::new(redis, cfg, policy, counters.clone());
        Self::from_tier(tier, counters)
    }
}

impl<E: EntityMapping, T: Tier<E>> Repository<E, T, ReadWrite> {
    pub fn from_tier(tier: T, counters: Arc<RepoCounters>) -> Self {
        Self {
            tier: Arc::new(tier),
            rules: Vec::new(),
            counters,
            _mode: PhantomData,
        }
    }

    /// Declare a cross-invalidation rule.
    #[must_use]
    pub fn with_rule(mut self, rule: Box<dyn InvalidationTarget<E>>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Drop write access at the type level.
    pub fn into_read_only(self) -> Repository<E, T, ReadOnly> {
        Repository {
            tier: self.tier,
            rules: self.rules,
            counters: self.counters,
            _mode: PhantomData,
        }
    }
}

impl<E: EntityMapping, T: Tier<E>, M: Send + Sync + 'static> Repository<E, T, M> {
    pub fn name(&self) -> &'static str {
        E::NAME
    }

    pub(crate) fn tier(&self) -> &Arc<T> {
        &self.tier
    }

    /// Direct tier access for test fixtures and diagnostics.
    #[cfg(any(test, feature = "test-internals"))]
    pub fn tier_internals(&self) -> &Arc<T> {
        &self.tier
    }

    pub(crate) fn counters(&self) -> &Arc<RepoCounters> {
        &self.counters
    }

    pub(crate) fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Find by key through the tier chain.
    pub async fn find(&self, key: &E::Key) -> Result<Option<Arc<E>>> {
        self.tier.find(key).await
    }

    /// Find and return the JSON serialization.
    pub async fn find_as_json(&self, key: &E::Key) -> Result<Option<String>> {
        self.tier.find_json(key).await
    }

    /// Find and return the compact binary serialization.
    pub async fn find_as_binary(&self, key: &E::Key) -> Result<Option<Vec<u8>>> {
        self.tier.find_binary(key).await
    }

    /// Drop the key from every cache tier. Idempotent; does not touch the
    /// database. Cross-invalidation rules fire with the cached entity when
    /// one was present.
    pub async fn invalidate(&self, key: &E::Key) {
        if self.has_rules() {
            if let Ok(Some(entity)) = self.tier.find(key).await {
                self.fire_deleted(&entity).await;
            }
        }
        self.tier.invalidate(key).await;
    }

    /// Drop the key from the in-process cache only; L2 keeps serving.
    pub fn evict_l1(&self, key: &E::Key) {
        self.tier.evict_l1(key);
    }

    /// Blocking one-shard L1 sweep.
    pub fn sweep(&self) -> bool {
        self.tier.sweep()
    }

    /// Non-blocking one-shard L1 sweep.
    pub fn try_sweep(&self) -> bool {
        self.tier.try_sweep()
    }

    /// Full L1 scan; returns evicted entry count.
    pub fn purge(&self) -> usize {
        self.tier.purge()
    }

    /// L1 entry count.
    pub fn l1_len(&self) -> usize {
        self.tier.len()
    }

    /// Prime static state (cached clock, policy registration).
    pub fn warmup(&self) {
        self.tier.warmup();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.counters.snapshot()
    }

    // =========================================================================
    // Rule firing - shared with the list layer.
    // =========================================================================

    pub(crate) async fn fire_created(&self, entity: &Arc<E>) {
        for rule in &self.rules {
            rule.on_created(entity).await;
        }
    }

    pub(crate) async fn fire_updated(&self, old: Option<&Arc<E>>, new: &Arc<E>) {
        for rule in &self.rules {
            rule.on_updated(old, new).await;
        }
    }

    pub(crate) async fn fire_deleted(&self, entity: &Arc<E>) {
        for rule in &self.rules {
            rule.on_deleted(entity).await;
        }
    }
}

impl<E: EntityMapping, T: Tier<E>> Repository<E, T, ReadWrite> {
    /// Insert, populate caches, then fire cross-invalidation.
    pub async fn insert(&self, entity: E) -> Result<Arc<E>> {
        let inserted = self.tier.insert(entity).await?;
        self.fire_created(&inserted).await;
        Ok(inserted)
    }

    /// Full-row update. Post-write cache policy follows the configured
    /// update strategy.
    pub async fn update(&self, key: &E::Key, entity: E) -> Result<bool> {
        let old = if self.has_rules() { self.tier.find(key).await? } else { None };
        let new = Arc::new(entity.clone());
        let ok = self.tier.update(key, entity).await?;
        if ok {
            self.fire_updated(old.as_ref(), &new).await;
        }
        Ok(ok)
    }

    /// Partial update; returns the fresh entity.
    pub async fn patch(&self, key: &E::Key, updates: &[FieldUpdate]) -> Result<Option<Arc<E>>> {
        let old = if self.has_rules() { self.tier.find(key).await? } else { None };
        let result = self.tier.patch(key, updates).await?;
        if let Some(new) = &result {
            self.fire_updated(old.as_ref(), new).await;
        }
        Ok(result)
    }

    /// Delete by key; returns the affected-row count.
    pub async fn erase(&self, key: &E::Key) -> Result<u64> {
        let old = if self.has_rules() { self.tier.find(key).await? } else { None };
        let affected = self.tier.erase_with_hint(key, old.clone()).await?;
        if affected > 0 {
            if let Some(old) = &old {
                self.fire_deleted(old).await;
            }
        }
        Ok(affected)
    }
}

#[async_trait]
impl<E: EntityMapping, T: Tier<E>, M: Send + Sync + 'static> KeyInvalidatable<E::Key>
    for Repository<E, T, M>
{
    async fn invalidate_key(&self, key: &E::Key) {
        // Tier-level invalidation only: rules do not cascade through
        // cross-invalidation targets.
        self.tier.invalidate(key).await;
    }
}
