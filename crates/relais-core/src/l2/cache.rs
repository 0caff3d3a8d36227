//! L2 cache operations over the provider.
//!
//! Every operation here swallows provider faults: failures are logged at
//! `warn` and reported as a miss (`None`, `false`, or `0`), so the
//! repository falls through to the next tier. A payload that fails to
//! deserialize is deleted on the spot - the next read repopulates from L3.

use std::sync::Arc;
use std::time::Duration;

use relais_error::Result;

use crate::config::L2Format;
use crate::entity::Entity;

use super::provider::{RedisArg, RedisCommand, RedisProvider, RedisValue};
use super::scripts;
use crate::list::LIST_BOUNDS_HEADER_SIZE;

/// Thin, error-swallowing wrapper over the Redis provider.
#[derive(Clone)]
pub struct L2Cache {
    provider: Arc<dyn RedisProvider>,
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

impl L2Cache {
    pub fn new(provider: Arc<dyn RedisProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn RedisProvider> {
        &self.provider
    }

    // =========================================================================
    // Raw payloads
    // =========================================================================

    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        match self.provider.exec(RedisCommand::new("GET").arg(key)).await {
            Ok(value) => value.into_bytes(),
            Err(e) => {
                tracing::warn!(key, error = %e, "L2 GET failed");
                None
            }
        }
    }

    /// `GETEX key EX ttl` - read and extend the TTL in one command.
    pub async fn get_raw_refresh(&self, key: &str, ttl: Duration) -> Option<Vec<u8>> {
        let cmd = RedisCommand::new("GETEX").arg(key).arg("EX").arg(ttl_secs(ttl));
        match self.provider.exec(cmd).await {
            Ok(value) => value.into_bytes(),
            Err(e) => {
                tracing::warn!(key, error = %e, "L2 GETEX failed");
                None
            }
        }
    }

    pub async fn set_raw(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> bool {
        let cmd = RedisCommand::new("SETEX").arg(key).arg(ttl_secs(ttl)).arg(payload);
        match self.provider.exec(cmd).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "L2 SETEX failed");
                false
            }
        }
    }

    pub async fn del(&self, key: &str) -> bool {
        match self.provider.exec(RedisCommand::new("DEL").arg(key)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "L2 DEL failed");
                false
            }
        }
    }

    /// Refresh a key's TTL without rewriting the value.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        let cmd = RedisCommand::new("EXPIRE").arg(key).arg(ttl_secs(ttl));
        match self.provider.exec(cmd).await {
            Ok(value) => value.as_int() == Some(1),
            Err(e) => {
                tracing::warn!(key, error = %e, "L2 EXPIRE failed");
                false
            }
        }
    }

    // =========================================================================
    // Entities
    // =========================================================================

    fn use_binary<E: Entity>(format: L2Format) -> bool {
        format == L2Format::Binary && E::SUPPORTS_BINARY
    }

    /// Fetch and deserialize an entity. A malformed payload is treated as
    /// a miss and deleted so L3 can repopulate it.
    pub async fn get_entity<E: Entity>(
        &self,
        key: &str,
        format: L2Format,
        refresh: Option<Duration>,
    ) -> Option<E> {
        let payload = match refresh {
            Some(ttl) => self.get_raw_refresh(key, ttl).await?,
            None => self.get_raw(key).await?,
        };

        let decoded: Result<E> = if Self::use_binary::<E>(format) {
            E::from_binary(&payload)
        } else {
            std::str::from_utf8(&payload)
                .map_err(|e| {
                    relais_error::SerializeError::Json { message: e.to_string() }.into()
                })
                .and_then(E::from_json)
        };

        match decoded {
            Ok(entity) => Some(entity),
            Err(e) => {
                tracing::warn!(key, error = %e, "malformed L2 payload; dropping entry");
                self.del(key).await;
                None
            }
        }
    }

    /// Serialize and store an entity. Serialization failures are logged
    /// and swallowed like provider faults.
    pub async fn set_entity<E: Entity>(
        &self,
        key: &str,
        entity: &E,
        format: L2Format,
        ttl: Duration,
    ) -> bool {
        let payload = if Self::use_binary::<E>(format) {
            entity.to_binary()
        } else {
            entity.to_json().map(String::into_bytes)
        };
        match payload {
            Ok(bytes) => self.set_raw(key, bytes, ttl).await,
            Err(e) => {
                tracing::warn!(key, error = %e, "entity serialization for L2 failed");
                false
            }
        }
    }

    // =========================================================================
    // List pages and group tracking
    // =========================================================================

    /// Fetch a list page payload, header included.
    pub async fn get_page(&self, key: &str, refresh: Option<Duration>) -> Option<Vec<u8>> {
        match refresh {
            Some(ttl) => self.get_raw_refresh(key, ttl).await,
            None => self.get_raw(key).await,
        }
    }

    /// Store a page payload (header already prepended) and register it in
    /// its group's tracking set. The tracking set receives the TTL only
    /// when it has none, so page additions don't keep extending it.
    pub async fn set_page(
        &self,
        page_key: &str,
        group_key: &str,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> bool {
        if !self.set_raw(page_key, payload, ttl).await {
            return false;
        }
        let tracking_key = format!("{group_key}:_keys");
        let cmds = vec![
            RedisCommand::new("SADD").arg(tracking_key.as_str()).arg(page_key),
            RedisCommand::new("EXPIRE")
                .arg(tracking_key.as_str())
                .arg(ttl_secs(ttl))
                .arg("NX"),
        ];
        match self.provider.pipeline_exec(cmds).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(page_key, error = %e, "L2 group tracking failed");
                false
            }
        }
    }

    /// Record a group in the repository's master hash, value = the sort
    /// field index its pages are bounded on.
    pub async fn register_group(&self, master_key: &str, group_key: &str, sort_field: usize) {
        let cmd = RedisCommand::new("HSET")
            .arg(master_key)
            .arg(group_key)
            .arg(i64::try_from(sort_field).unwrap_or(0));
        if let Err(e) = self.provider.exec(cmd).await {
            tracing::warn!(group_key, error = %e, "L2 master-set registration failed");
        }
    }

    /// Delete every page of a group in one round-trip.
    pub async fn invalidate_group(&self, group_key: &str) -> usize {
        let tracking_key = format!("{group_key}:_keys");
        self.run_script(scripts::INVALIDATE_GROUP, &[tracking_key], &[]).await
    }

    /// Delete only the pages of a group whose bounds cover `sort_value`.
    pub async fn invalidate_group_selective(&self, group_key: &str, sort_value: i64) -> usize {
        let tracking_key = format!("{group_key}:_keys");
        self.run_script(
            scripts::INVALIDATE_GROUP_SELECTIVE,
            &[tracking_key],
            &[
                RedisArg::Int(sort_value),
                RedisArg::Int(LIST_BOUNDS_HEADER_SIZE as i64),
            ],
        )
        .await
    }

    /// Update variant: old and new sort values.
    pub async fn invalidate_group_selective_update(
        &self,
        group_key: &str,
        old_sort: i64,
        new_sort: i64,
    ) -> usize {
        let tracking_key = format!("{group_key}:_keys");
        self.run_script(
            scripts::INVALIDATE_GROUP_SELECTIVE_UPDATE,
            &[tracking_key],
            &[
                RedisArg::Int(old_sort),
                RedisArg::Int(new_sort),
                RedisArg::Int(LIST_BOUNDS_HEADER_SIZE as i64),
            ],
        )
        .await
    }

    /// Coarse fallback: drain every group listed in the master hash.
    pub async fn invalidate_all_list_groups(&self, master_key: &str) -> usize {
        let groups = match self.provider.exec(RedisCommand::new("HKEYS").arg(master_key)).await {
            Ok(RedisValue::Array(items)) => items,
            Ok(_) => return 0,
            Err(e) => {
                tracing::warn!(master_key, error = %e, "L2 HKEYS failed");
                return 0;
            }
        };

        let mut count = 0;
        for group in groups {
            if let Some(bytes) = group.as_bytes() {
                if let Ok(group_key) = std::str::from_utf8(bytes) {
                    count += self.invalidate_group(group_key).await;
                }
            }
        }

        if let Err(e) = self.provider.exec(RedisCommand::new("UNLINK").arg(master_key)).await {
            tracing::warn!(master_key, error = %e, "L2 UNLINK failed");
        }
        count
    }

    /// SCAN-based pattern invalidation (non-blocking server-side).
    pub async fn invalidate_pattern(&self, pattern: &str, batch_size: usize) -> usize {
        let mut count = 0usize;
        let mut cursor: i64 = 0;
        loop {
            let cmd = RedisCommand::new("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(i64::try_from(batch_size).unwrap_or(100));
            let reply = match self.provider.exec(cmd).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "L2 SCAN failed");
                    return count;
                }
            };

            let Some(parts) = reply.as_array() else { break };
            if parts.len() < 2 {
                break;
            }
            cursor = match &parts[0] {
                RedisValue::Data(bytes) => std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
                RedisValue::Int(v) => *v,
                _ => 0,
            };

            if let Some(keys) = parts[1].as_array() {
                for key in keys {
                    if let Some(bytes) = key.as_bytes() {
                        if let Ok(key_str) = std::str::from_utf8(bytes) {
                            if self.del(key_str).await {
                                count += 1;
                            }
                        }
                    }
                }
            }

            if cursor == 0 {
                break;
            }
        }
        count
    }

    async fn run_script(
        &self,
        script: &'static str,
        keys: &[String],
        args: &[RedisArg],
    ) -> usize {
        match self.provider.eval_script(script, keys, args).await {
            Ok(value) => usize::try_from(value.as_int().unwrap_or(0)).unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = %e, "L2 invalidation script failed");
                0
            }
        }
    }
}
