//! # Relais
//!
//! A tiered, read-through cache for entities persisted in PostgreSQL
//! with an optional shared Redis tier.
//!
//! Single-entity lookups and paginated list queries go through one
//! repository surface; hot items live in an in-process memory cache (L1)
//! with GDSF eviction, backed by Redis (L2), with PostgreSQL as the
//! durable tier (L3). Entity writes invalidate list pages precisely
//! through sort-order bounds, and declarative rules propagate
//! invalidations across repositories.
//!
//! ```no_run
//! use std::sync::Arc;
//! use relais::config::BOTH;
//! use relais::{L1L2Repo, L2Cache, PostgresProvider, RedisClient};
//! # use relais_test_utils::TestItem;
//!
//! # async fn example() -> relais::Result<()> {
//! let db = Arc::new(PostgresProvider::new("postgresql://localhost/app").await?);
//! let redis = Arc::new(RedisClient::connect("redis://localhost/").await?);
//!
//! let items: L1L2Repo<TestItem> = L1L2Repo::l1_l2(db, L2Cache::new(redis), BOTH, None);
//! items.warmup();
//!
//! if let Some(item) = items.find(&42).await? {
//!     println!("{}", item.name);
//! }
//! # Ok(())
//! # }
//! ```

pub use relais_core::{cache, clock, config, db, entity, l2, list, metrics, repository};

pub use relais_batch::{BatchScheduler, ConcurrencyGate, TimingEstimator, WriteOutcome};
pub use relais_core::cache::GdsfPolicy;
pub use relais_core::db::PostgresProvider;
pub use relais_core::l2::{L2Cache, RedisClient};
pub use relais_core::repository::{
    invalidate_key, invalidate_key_resolved, invalidate_list, invalidate_list_group,
    L1L2Repo, L1Repo, L2Repo, ListRepository, ReadOnly, ReadWrite, Repository, UncachedRepo,
};
pub use relais_error::{
    BatchError, CacheError, DbError, ListError, RelaisError, Result, SerializeError,
};
