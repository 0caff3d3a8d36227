//! The tier seam: every cache layer and the database base implement this
//! trait, each wrapping the one below and calling through explicitly.

use std::sync::Arc;

use async_trait::async_trait;
use relais_error::Result;

use crate::db::FieldUpdate;
use crate::entity::EntityMapping;

/// One layer of the repository chain.
///
/// Reads dispatch top-down (each layer consults its cache before calling
/// through); writes dispatch bottom-up (the base commits first, then each
/// layer settles its cache). Cache-layer faults never surface here - they
/// are logged and swallowed inside the layer, so errors reaching callers
/// are database errors.
#[async_trait]
pub trait Tier<E: EntityMapping>: Send + Sync + 'static {
    /// Single-entity lookup. `None` means the row does not exist.
    async fn find(&self, key: &E::Key) -> Result<Option<Arc<E>>>;

    /// Lookup returning the JSON serialization. Layers with a serialized
    /// form at hand override this to skip entity construction.
    async fn find_json(&self, key: &E::Key) -> Result<Option<String>> {
        match self.find(key).await? {
            Some(entity) => Ok(Some(entity.to_json()?)),
            None => Ok(None),
        }
    }

    /// Lookup returning the compact binary serialization.
    async fn find_binary(&self, key: &E::Key) -> Result<Option<Vec<u8>>> {
        match self.find(key).await? {
            Some(entity) => Ok(Some(entity.to_binary()?)),
            None => Ok(None),
        }
    }

    /// Insert and return the entity with server-assigned columns.
    async fn insert(&self, entity: E) -> Result<Arc<E>>;

    /// Full-row update. Returns whether any row was affected.
    async fn update(&self, key: &E::Key, entity: E) -> Result<bool>;

    /// Partial update; returns the fresh entity, or `None` if the row
    /// vanished.
    async fn patch(&self, key: &E::Key, updates: &[FieldUpdate]) -> Result<Option<Arc<E>>>;

    /// Delete by key; returns the affected-row count.
    async fn erase(&self, key: &E::Key) -> Result<u64> {
        self.erase_with_hint(key, None).await
    }

    /// Delete with an optional previously cached entity. Partial-key
    /// entities use the hint to append partition-column predicates so the
    /// server can prune partitions.
    async fn erase_with_hint(&self, key: &E::Key, hint: Option<Arc<E>>) -> Result<u64>;

    /// Drop cached entries for a key in this layer and below. No database
    /// effect; idempotent.
    async fn invalidate(&self, key: &E::Key);

    /// Drop the key from the in-process cache only (L2 untouched).
    /// Synchronous - there is no network work to do.
    fn evict_l1(&self, _key: &E::Key) {}

    // =========================================================================
    // L1 maintenance - no-ops below the memory tier.
    // =========================================================================

    /// Blocking sweep of one L1 shard. Returns whether anything was
    /// evicted.
    fn sweep(&self) -> bool {
        false
    }

    /// Non-blocking sweep attempt of one L1 shard.
    fn try_sweep(&self) -> bool {
        false
    }

    /// Sweep all L1 shards; returns evicted entry count.
    fn purge(&self) -> usize {
        0
    }

    /// L1 entry count.
    fn len(&self) -> usize {
        0
    }

    /// Prime static state (clock, policy registration). Idempotent.
    fn warmup(&self) {}
}
