//! L1 in-process cache: sharded concurrent map, GDSF eviction metadata,
//! ghost admission control, and the global eviction policy.

mod gdsf;
mod metadata;
mod shard_map;

pub use gdsf::{GdsfPolicy, RepoHandle, DECAY_FACTOR, GHOST_OVERHEAD_BYTES};
pub use metadata::{pack_count_gen, unpack_count_gen, CacheSlot, GdsfMeta};
pub use shard_map::{GetAction, PutDecision, PutOutcome, ShardMap, SweepOutcome};
