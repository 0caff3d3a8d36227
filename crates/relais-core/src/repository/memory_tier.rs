//! L1 tier: per-process sharded cache with GDSF eviction, ghost admission
//! and memory accounting.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use relais_error::Result;

use crate::cache::{
    CacheSlot, GdsfMeta, GdsfPolicy, GetAction, PutDecision, RepoHandle, ShardMap,
};
use crate::clock;
use crate::config::{CacheConfig, UpdateStrategy};
use crate::db::FieldUpdate;
use crate::entity::EntityMapping;
use crate::metrics::RepoCounters;

use super::tier::Tier;

fn load_f32(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

fn cas_f32(cell: &AtomicU32, old: f32, new: f32) {
    // CAS without retry - a lost update converges on the next sample.
    let _ = cell.compare_exchange(
        old.to_bits(),
        new.to_bits(),
        Ordering::Relaxed,
        Ordering::Relaxed,
    );
}

/// Shared L1 state, held in an `Arc` so the global policy's emergency
/// cleanup can sweep it without knowing the repository type.
struct L1State<E: EntityMapping> {
    cache: ShardMap<E>,
    cfg: CacheConfig,
    policy: Option<Arc<GdsfPolicy>>,
    avg_cost_us: AtomicU32,
    repo_score: AtomicU32,
    get_counter: AtomicU32,
    last_cleanup: AtomicI64,
}

impl<E: EntityMapping> L1State<E> {
    fn ttl_nanos(&self) -> i64 {
        clock::duration_nanos(self.cfg.l1_ttl)
    }

    fn avg_cost(&self) -> f32 {
        load_f32(&self.avg_cost_us)
    }

    /// EMA with alpha 0.1; the first sample seeds the average directly.
    fn update_avg_cost(&self, elapsed_us: f32) {
        const ALPHA: f32 = 0.1;
        let old = self.avg_cost();
        let new = if old == 0.0 { elapsed_us } else { ALPHA * elapsed_us + (1.0 - ALPHA) * old };
        cas_f32(&self.avg_cost_us, old, new);
    }

    fn get(&self, key: &E::Key) -> Option<Arc<E>> {
        let has_ttl = self.cfg.has_l1_ttl();
        let now = clock::cached_nanos();
        let (hit, freed) = self.cache.get(key, |slot| {
            if slot.is_ghost() {
                return GetAction::Miss;
            }
            if has_ttl && slot.is_expired(now) && !self.cfg.l1_accept_expired_on_get {
                return GetAction::Invalidate;
            }
            if has_ttl && self.cfg.l1_refresh_on_get {
                slot.refresh_expiry(now + self.ttl_nanos());
            }
            if let Some(policy) = &self.policy {
                if let Some(meta) = slot.gdsf_meta() {
                    policy.bump(meta);
                }
            }
            GetAction::Accept
        });
        if freed > 0 {
            if let Some(policy) = &self.policy {
                policy.sub_bytes(freed);
            }
        }
        hit
    }

    fn put(&self, key: E::Key, entity: Arc<E>) {
        let expires_at = if self.cfg.has_l1_ttl() {
            clock::cached_nanos() + self.ttl_nanos()
        } else {
            0
        };

        let Some(policy) = self.policy.clone() else {
            let slot = if expires_at != 0 {
                CacheSlot::Timed { entity, expires_at: AtomicI64::new(expires_at) }
            } else {
                CacheSlot::Plain { entity }
            };
            self.cache.put(key, slot);
            return;
        };

        let cost = self.avg_cost();
        let overhead = std::mem::size_of::<E::Key>() + std::mem::size_of::<CacheSlot<E>>();
        let bytes = entity.memory_usage() + overhead;
        let bytes32 = u32::try_from(bytes).unwrap_or(u32::MAX);
        let generation = policy.generation();
        let threshold = policy.admission_threshold();

        // Records what the admission closure decided so accounting can be
        // settled after the lock is released.
        let mut charged: usize = 0;
        let (_, replaced) = self.cache.put_with(key, |existing| {
            let real = || CacheSlot::Scored {
                entity: entity.clone(),
                bytes: bytes32,
                meta: GdsfMeta::new(generation, expires_at),
            };
            match existing {
                // A new value for a key we already hold is a refresh, not
                // an admission decision.
                Some(slot) if !slot.is_ghost() => {
                    charged = bytes;
                    PutDecision::Insert(real())
                }
                Some(CacheSlot::Ghost { estimated_bytes, meta }) => {
                    let count = policy.decay(meta).saturating_add(1);
                    let virtual_score =
                        GdsfPolicy::score(count, cost, *estimated_bytes as usize);
                    if virtual_score >= threshold {
                        // Promotion discards the ghost's accumulated count.
                        charged = bytes;
                        PutDecision::Insert(real())
                    } else {
                        policy.bump(meta);
                        PutDecision::Keep
                    }
                }
                Some(_) => unreachable!("ghost handled above"),
                None => {
                    let candidate = GdsfPolicy::score(1, cost, bytes);
                    if candidate >= threshold {
                        charged = bytes;
                        PutDecision::Insert(real())
                    } else {
                        charged = crate::cache::GHOST_OVERHEAD_BYTES;
                        PutDecision::Insert(CacheSlot::Ghost {
                            estimated_bytes: bytes32,
                            meta: GdsfMeta::new(generation, 0),
                        })
                    }
                }
            }
        });

        if let Some(old) = replaced {
            policy.sub_bytes(old.charged_bytes());
        }
        if charged > 0 {
            policy.add_bytes(charged);
        }
        if policy.is_over_budget() {
            policy.emergency_cleanup();
        }
    }

    fn invalidate(&self, key: &E::Key) {
        if let Some(slot) = self.cache.invalidate(key) {
            if let Some(policy) = &self.policy {
                policy.sub_bytes(slot.charged_bytes());
            }
        }
    }

    fn sweep_once(&self, blocking: bool) -> bool {
        if !self.cfg.has_l1_ttl() && self.policy.is_none() {
            return false;
        }
        let now = clock::cached_nanos();
        let has_ttl = self.cfg.has_l1_ttl();
        let threshold = self.policy.as_ref().map_or(0.0, |p| p.threshold());
        let cost = self.avg_cost();

        let mut kept = 0usize;
        let mut rejected = 0usize;
        let mut kept_sum = 0.0f32;

        let mut evict = |_key: &E::Key, slot: &CacheSlot<E>| -> bool {
            match slot {
                CacheSlot::Plain { .. } => false,
                CacheSlot::Timed { .. } => has_ttl && slot.is_expired(now),
                CacheSlot::Ghost { meta, .. } => {
                    // Ghosts that decayed to nothing stop paying rent.
                    self.policy.as_ref().is_some_and(|p| p.decay(meta) == 0)
                }
                CacheSlot::Scored { meta, bytes, .. } => {
                    let Some(policy) = &self.policy else {
                        return has_ttl && meta.is_expired(now);
                    };
                    let count = policy.decay(meta);
                    if has_ttl && meta.is_expired(now) {
                        rejected += 1;
                        return true;
                    }
                    let score = GdsfPolicy::score(count, cost, *bytes as usize);
                    if score < threshold {
                        rejected += 1;
                        true
                    } else {
                        kept += 1;
                        kept_sum += score;
                        false
                    }
                }
            }
        };

        let outcome = if blocking {
            Some(self.cache.sweep(&mut evict))
        } else {
            self.cache.try_sweep(&mut evict)
        };
        let Some(outcome) = outcome else { return false };

        if let Some(policy) = &self.policy {
            policy.sub_bytes(outcome.removed_bytes);
            let kept_avg = if kept > 0 { kept_sum / kept as f32 } else { 0.0 };
            if kept > 0 {
                let shards = self.cache.shard_count() as f32;
                let old = load_f32(&self.repo_score);
                let new = (old * (shards - 1.0) + kept_avg) / shards;
                cas_f32(&self.repo_score, old, new);
            }
            policy.record_sweep(kept_avg, kept, rejected);
        }
        outcome.removed > 0
    }

    fn purge(&self) -> usize {
        let mut removed_total = 0;
        for _ in 0..self.cache.shard_count() {
            let before = self.cache.len();
            self.sweep_once(true);
            removed_total += before - self.cache.len();
        }
        removed_total
    }

    /// Read-driven cleanup: every N gets, throttled by the minimum
    /// interval. Over budget escalates to the policy's emergency path.
    fn maybe_cleanup(&self) {
        let every = self.cfg.l1_cleanup_every_n_gets;
        if every == 0 || (!self.cfg.has_l1_ttl() && self.policy.is_none()) {
            return;
        }
        if self.get_counter.fetch_add(1, Ordering::Relaxed) % every != 0 {
            return;
        }
        let now = clock::precise_nanos();
        let last = self.last_cleanup.load(Ordering::Relaxed);
        let min_interval = clock::duration_nanos(self.cfg.l1_cleanup_min_interval);
        if now - last < min_interval {
            return;
        }
        if self
            .last_cleanup
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        if let Some(policy) = &self.policy {
            if policy.is_over_budget() {
                policy.emergency_cleanup();
                return;
            }
        }
        self.sweep_once(false);
    }
}

/// Memory tier over any base. With a GDSF policy attached, eviction is
/// score-driven within the policy's shared memory budget; otherwise
/// entries live until TTL expiry (or forever).
pub struct MemoryTier<E: EntityMapping, B: Tier<E>> {
    base: B,
    state: Arc<L1State<E>>,
    counters: Arc<RepoCounters>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: EntityMapping, B: Tier<E>> MemoryTier<E, B> {
    pub fn new(
        base: B,
        cfg: CacheConfig,
        policy: Option<Arc<GdsfPolicy>>,
        counters: Arc<RepoCounters>,
    ) -> Self {
        let state = Arc::new(L1State {
            cache: ShardMap::new(cfg.l1_shard_count_log2),
            cfg,
            policy: policy.clone(),
            avg_cost_us: AtomicU32::new(0f32.to_bits()),
            repo_score: AtomicU32::new(0f32.to_bits()),
            get_counter: AtomicU32::new(0),
            last_cleanup: AtomicI64::new(0),
        });

        if let Some(policy) = policy {
            let sweep_state = state.clone();
            let size_state = state.clone();
            let score_state = state.clone();
            policy.enroll(RepoHandle {
                name: E::NAME.to_string(),
                sweep: Box::new(move || sweep_state.sweep_once(true)),
                size: Box::new(move || size_state.cache.len()),
                repo_score: Box::new(move || load_f32(&score_state.repo_score)),
            });
        }

        Self { base, state, counters, _marker: PhantomData }
    }

    /// Average construction cost in microseconds (diagnostics).
    pub fn avg_construction_cost_us(&self) -> f32 {
        self.state.avg_cost()
    }

    /// Average surviving-entry score of this repository (diagnostics).
    pub fn repo_score(&self) -> f32 {
        load_f32(&self.state.repo_score)
    }

    #[cfg(any(test, feature = "test-internals"))]
    pub fn seed_avg_cost(&self, us: f32) {
        self.state.avg_cost_us.store(us.to_bits(), Ordering::Relaxed);
    }

    #[cfg(any(test, feature = "test-internals"))]
    pub fn is_ghost(&self, key: &E::Key) -> bool {
        self.state.cache.peek(key, CacheSlot::is_ghost).unwrap_or(false)
    }

    #[cfg(any(test, feature = "test-internals"))]
    pub fn ghost_count(&self, key: &E::Key) -> Option<u32> {
        self.state.cache.peek(key, |slot| match slot {
            CacheSlot::Ghost { meta, .. } => Some(meta.raw_count()),
            _ => None,
        })?
    }

    fn record_miss_cost(&self, started: Instant) {
        #[allow(clippy::cast_precision_loss)]
        let elapsed_us = started.elapsed().as_micros() as f32;
        self.state.update_avg_cost(elapsed_us);
    }
}

#[async_trait]
impl<E: EntityMapping, B: Tier<E>> Tier<E> for MemoryTier<E, B> {
    async fn find(&self, key: &E::Key) -> Result<Option<Arc<E>>> {
        if let Some(hit) = self.state.get(key) {
            self.counters.l1_hits.increment();
            self.state.maybe_cleanup();
            return Ok(Some(hit));
        }
        self.counters.l1_misses.increment();
        self.state.maybe_cleanup();

        let gdsf = self.state.policy.is_some();
        let started = Instant::now();
        let found = self.base.find(key).await?;
        if let Some(entity) = &found {
            if gdsf {
                self.record_miss_cost(started);
            }
            self.state.put(key.clone(), entity.clone());
        }
        Ok(found)
    }

    async fn find_json(&self, key: &E::Key) -> Result<Option<String>> {
        if let Some(hit) = self.state.get(key) {
            self.counters.l1_hits.increment();
            return Ok(Some(hit.to_json()?));
        }
        // Entity path so the result populates L1.
        match self.find(key).await? {
            Some(entity) => Ok(Some(entity.to_json()?)),
            None => Ok(None),
        }
    }

    async fn find_binary(&self, key: &E::Key) -> Result<Option<Vec<u8>>> {
        if let Some(hit) = self.state.get(key) {
            self.counters.l1_hits.increment();
            return Ok(Some(hit.to_binary()?));
        }
        self.counters.l1_misses.increment();

        let gdsf = self.state.policy.is_some();
        let started = Instant::now();
        let bin = self.base.find_binary(key).await?;
        if let Some(bytes) = &bin {
            if gdsf {
                self.record_miss_cost(started);
            }
            // Reconstruct from the raw bytes so L1 serves entity reads too.
            if E::SUPPORTS_BINARY {
                if let Ok(entity) = E::from_binary(bytes) {
                    self.state.put(key.clone(), Arc::new(entity));
                }
            }
        }
        Ok(bin)
    }

    async fn insert(&self, entity: E) -> Result<Arc<E>> {
        let inserted = self.base.insert(entity).await?;
        self.state.put(inserted.key(), inserted.clone());
        Ok(inserted)
    }

    async fn update(&self, key: &E::Key, entity: E) -> Result<bool> {
        let populate = entity.clone();
        let ok = self.base.update(key, entity).await?;
        if ok {
            match self.state.cfg.update_strategy {
                UpdateStrategy::InvalidateAndLazyReload => self.state.invalidate(key),
                UpdateStrategy::PopulateImmediately => {
                    self.state.put(key.clone(), Arc::new(populate));
                }
            }
        }
        Ok(ok)
    }

    async fn patch(&self, key: &E::Key, updates: &[FieldUpdate]) -> Result<Option<Arc<E>>> {
        // Same post-write sequence as update: the cache is only settled
        // once the row actually changed. A failed or no-op patch leaves
        // L1 untouched.
        let result = self.base.patch(key, updates).await?;
        if result.is_some() {
            self.state.invalidate(key);
        }
        Ok(result)
    }

    async fn erase_with_hint(&self, key: &E::Key, mut hint: Option<Arc<E>>) -> Result<u64> {
        // Partition hint from L1 is free: a plain map read.
        if E::DELETE_BY_PK_WITH_HINT.is_some() && hint.is_none() {
            hint = self.state.get(key);
        }
        let affected = self.base.erase_with_hint(key, hint).await?;
        self.state.invalidate(key);
        Ok(affected)
    }

    async fn invalidate(&self, key: &E::Key) {
        self.state.invalidate(key);
        self.base.invalidate(key).await;
    }

    fn evict_l1(&self, key: &E::Key) {
        self.state.invalidate(key);
    }

    fn sweep(&self) -> bool {
        self.state.sweep_once(true)
    }

    fn try_sweep(&self) -> bool {
        self.state.sweep_once(false)
    }

    fn purge(&self) -> usize {
        self.state.purge()
    }

    fn len(&self) -> usize {
        self.state.cache.len()
    }

    fn warmup(&self) {
        clock::ensure_started();
        self.base.warmup();
        tracing::debug!(repo = E::NAME, "L1 cache primed");
    }
}
