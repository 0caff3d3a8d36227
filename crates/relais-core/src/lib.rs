//! # Relais Core
//!
//! Tiered read-through entity cache: an in-process memory cache (L1) backed
//! by a shared Redis cache (L2), with PostgreSQL as the durable tier (L3).
//!
//! ## Architecture
//!
//! ```text
//! find(key)
//!     │
//!     ▼
//! ┌─────────────┐  hit   ┌──────────────┐  hit   ┌──────────────┐
//! │ MemoryTier  │───────▶│  RedisTier   │───────▶│    DbTier    │
//! │ (L1, GDSF)  │  miss  │ (L2, SETEX)  │  miss  │ (L3, SELECT) │
//! └─────────────┘        └──────────────┘        └──────────────┘
//!       ▲                       ▲                        │
//!       └──────populate─────────┴──────populate──────────┘
//! ```
//!
//! Writes run in the opposite direction: L3 commits first, then L2 and L1
//! are invalidated (or write-through populated), then the list cache is
//! notified, then cross-invalidation rules fire.
//!
//! ### Key Components
//!
//! - **Repository**: static composition of the tier chain plus list and
//!   cross-invalidation layers ([`repository`])
//! - **L1**: sharded concurrent map with GDSF eviction, ghost admission and
//!   memory accounting ([`cache`])
//! - **L2**: Redis-backed entity and list-page store with server-side
//!   selective invalidation scripts ([`l2`])
//! - **L3**: prepared parameterized queries through a pooled provider
//!   ([`db`])
//! - **List cache**: pagination-aware result-page cache with sort-bound
//!   driven invalidation ([`list`])
//!
//! The adaptive I/O batcher lives in the sibling `relais-batch` crate.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod entity;
pub mod l2;
pub mod list;
pub mod metrics;
pub mod repository;

pub use relais_error::{
    BatchError, CacheError, DbError, ListError, RelaisError, Result, SerializeError,
};
