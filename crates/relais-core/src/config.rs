//! Per-repository cache configuration.
//!
//! `CacheConfig` is a plain `Copy` aggregate with `const fn` builder
//! methods, so repository configurations can be declared as constants:
//!
//! ```rust
//! use relais_core::config::{CacheConfig, LOCAL};
//! use std::time::Duration;
//!
//! const ITEMS: CacheConfig = LOCAL
//!     .with_l1_ttl(Duration::from_secs(60))
//!     .with_l1_shard_count_log2(4);
//! ```

use std::time::Duration;

/// Which caching layers are active for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLevel {
    /// DB only.
    None,
    /// RAM -> DB (Redis bypassed).
    L1,
    /// Redis -> DB (no local RAM cache).
    L2,
    /// RAM -> Redis -> DB (full hierarchy).
    L1L2,
}

impl CacheLevel {
    pub const fn has_l1(self) -> bool {
        matches!(self, Self::L1 | Self::L1L2)
    }

    pub const fn has_l2(self) -> bool {
        matches!(self, Self::L2 | Self::L1L2)
    }
}

/// How entities are serialized into Redis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2Format {
    /// Compact binary (default). Falls back to JSON for entities without
    /// binary serialization support.
    Binary,
    /// JSON - human-readable, interoperable with non-Rust consumers.
    Json,
}

/// How the cache handles a successful update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Safe: invalidate cache entries, reload on next read.
    InvalidateAndLazyReload,
    /// Optimistic: write the fresh entity through to the cache.
    PopulateImmediately,
}

/// Structural configuration aggregate for one repository.
///
/// All fields are public; the `with_*` methods allow fluent const
/// construction from the presets below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub cache_level: CacheLevel,
    pub read_only: bool,
    pub update_strategy: UpdateStrategy,

    /// L1 entry time-to-live. `Duration::ZERO` disables the TTL check.
    pub l1_ttl: Duration,
    /// log2 of the L1 shard count (2^k shards).
    pub l1_shard_count_log2: u8,
    /// A hit extends the entry's expiry by `l1_ttl`.
    pub l1_refresh_on_get: bool,
    /// Expired entries are served until swept instead of being rejected
    /// on read.
    pub l1_accept_expired_on_get: bool,
    /// A non-blocking one-shard sweep is attempted every N gets.
    /// 0 disables read-driven sweeps.
    pub l1_cleanup_every_n_gets: u32,
    /// Minimum interval between read-driven sweeps.
    pub l1_cleanup_min_interval: Duration,

    /// Expiry used in L2 `SETEX` commands.
    pub l2_ttl: Duration,
    /// L2 reads use `GETEX` to extend the TTL.
    pub l2_refresh_on_get: bool,
    pub l2_format: L2Format,
}

impl CacheConfig {
    pub const fn with_cache_level(self, v: CacheLevel) -> Self {
        Self { cache_level: v, ..self }
    }

    pub const fn with_read_only(self) -> Self {
        Self { read_only: true, ..self }
    }

    pub const fn with_update_strategy(self, v: UpdateStrategy) -> Self {
        Self { update_strategy: v, ..self }
    }

    pub const fn with_l1_ttl(self, v: Duration) -> Self {
        Self { l1_ttl: v, ..self }
    }

    pub const fn with_l1_shard_count_log2(self, v: u8) -> Self {
        Self { l1_shard_count_log2: v, ..self }
    }

    pub const fn with_l1_refresh_on_get(self, v: bool) -> Self {
        Self { l1_refresh_on_get: v, ..self }
    }

    pub const fn with_l1_accept_expired_on_get(self, v: bool) -> Self {
        Self { l1_accept_expired_on_get: v, ..self }
    }

    pub const fn with_l1_cleanup_every_n_gets(self, v: u32) -> Self {
        Self { l1_cleanup_every_n_gets: v, ..self }
    }

    pub const fn with_l1_cleanup_min_interval(self, v: Duration) -> Self {
        Self { l1_cleanup_min_interval: v, ..self }
    }

    pub const fn with_l2_ttl(self, v: Duration) -> Self {
        Self { l2_ttl: v, ..self }
    }

    pub const fn with_l2_refresh_on_get(self, v: bool) -> Self {
        Self { l2_refresh_on_get: v, ..self }
    }

    pub const fn with_l2_format(self, v: L2Format) -> Self {
        Self { l2_format: v, ..self }
    }

    pub const fn has_l1(&self) -> bool {
        self.cache_level.has_l1()
    }

    pub const fn has_l2(&self) -> bool {
        self.cache_level.has_l2()
    }

    pub const fn has_l1_ttl(&self) -> bool {
        !self.l1_ttl.is_zero()
    }
}

/// No caching - direct database access only.
/// E.g. log history, write-only tables.
pub const UNCACHED: CacheConfig = CacheConfig {
    cache_level: CacheLevel::None,
    read_only: false,
    update_strategy: UpdateStrategy::InvalidateAndLazyReload,
    l1_ttl: Duration::from_secs(3600),
    l1_shard_count_log2: 3,
    l1_refresh_on_get: false,
    l1_accept_expired_on_get: false,
    l1_cleanup_every_n_gets: 500,
    l1_cleanup_min_interval: Duration::from_secs(1),
    l2_ttl: Duration::from_secs(4 * 3600),
    l2_refresh_on_get: false,
    l2_format: L2Format::Binary,
};

/// RAM cache only (L1) - fast local cache, no Redis.
/// Perfect for data always accessed via the same service instance.
pub const LOCAL: CacheConfig = UNCACHED.with_cache_level(CacheLevel::L1);

/// Redis cache only (L2) - shared cache across instances, no local RAM cache.
/// E.g. admin metrics, global counters.
pub const REDIS: CacheConfig = UNCACHED.with_cache_level(CacheLevel::L2);

/// Full caching (L1 + L2) - RAM cache backed by Redis.
/// Typical use-case: short L1 TTL + long L2 TTL.
pub const BOTH: CacheConfig = UNCACHED
    .with_cache_level(CacheLevel::L1L2)
    .with_l1_ttl(Duration::from_secs(60))
    .with_l2_ttl(Duration::from_secs(3600));
