//! Repository composition.
//!
//! The tier chain is assembled statically: each layer is a generic struct
//! wrapping its base, so dispatch is monomorphized - no virtual calls
//! between tiers. The optional layers (list cache, cross-invalidation)
//! sit on top of the chain:
//!
//! ```text
//! [cross-invalidation rules]
//!   -> [ListRepository]
//!     -> MemoryTier (L1)
//!       -> RedisTier (L2)
//!         -> DbTier (L3)
//! ```

mod db_tier;
mod invalidation;
mod list_layer;
mod memory_tier;
mod redis_tier;
mod repo;
mod tier;

pub use db_tier::DbTier;
pub use invalidation::{
    invalidate_key, invalidate_key_resolved, invalidate_list, invalidate_list_group,
    GroupInvalidatable, InvalidationTarget, KeyInvalidatable, ListNotifiable,
};
pub use list_layer::ListRepository;
pub use memory_tier::MemoryTier;
pub use redis_tier::RedisTier;
pub use repo::{
    L1L2Repo, L1Repo, L2Repo, ReadOnly, ReadWrite, Repository, UncachedRepo,
};
pub use tier::Tier;
