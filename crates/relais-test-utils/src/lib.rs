//! Test support for the relais crates: in-memory mock providers plus a
//! fixture entity with a list descriptor.
//!
//! Nothing here talks to a real PostgreSQL or Redis; the mocks implement
//! the provider seams faithfully enough to exercise every tier, including
//! the header-aware selective group invalidation scripts.

mod item;
mod mock_db;
mod mock_redis;

pub use item::{TestItem, TestItemFilters, TestItemStore, TestItemsByCategory};
pub use mock_db::MockDb;
pub use mock_redis::MockRedis;
