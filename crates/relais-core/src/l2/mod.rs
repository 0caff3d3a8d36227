//! L2 network cache: Redis-backed shared store for serialized entities
//! and list pages, with TTL refresh and script-driven group invalidation.

mod cache;
mod client;
mod provider;
pub mod scripts;

pub use cache::L2Cache;
pub use client::RedisClient;
pub use provider::{RedisArg, RedisCommand, RedisProvider, RedisValue};
