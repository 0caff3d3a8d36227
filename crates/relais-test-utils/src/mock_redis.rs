//! In-memory Redis mock.
//!
//! Implements the command subset the L2 tier uses (strings with expiry,
//! sets, hashes, SCAN) and interprets the selective-invalidation scripts
//! natively by decoding page headers with the same `ListBoundsHeader`
//! logic the Lua decision table mirrors.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use relais_core::l2::{scripts, RedisArg, RedisCommand, RedisProvider, RedisValue};
use relais_core::list::ListBoundsHeader;
use relais_error::{CacheError, Result};

#[derive(Default)]
struct Store {
    strings: HashMap<String, (Vec<u8>, Option<Instant>)>,
    sets: HashMap<String, HashSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl Store {
    fn get_live(&mut self, key: &str) -> Option<Vec<u8>> {
        match self.strings.get(key) {
            Some((_, Some(expiry))) if *expiry <= Instant::now() => {
                self.strings.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    fn del(&mut self, key: &str) -> i64 {
        let mut n = 0;
        if self.strings.remove(key).is_some() {
            n += 1;
        }
        if self.sets.remove(key).is_some() {
            n += 1;
        }
        if self.hashes.remove(key).is_some() {
            n += 1;
        }
        n
    }
}

/// In-memory `RedisProvider` with call counters.
#[derive(Default)]
pub struct MockRedis {
    store: Mutex<Store>,
    exec_count: AtomicU64,
    pipeline_count: AtomicU64,
    script_count: AtomicU64,
}

fn arg_str(arg: &RedisArg) -> String {
    match arg {
        RedisArg::Str(v) => v.clone(),
        RedisArg::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
        RedisArg::Int(v) => v.to_string(),
    }
}

fn arg_bytes(arg: &RedisArg) -> Vec<u8> {
    match arg {
        RedisArg::Str(v) => v.clone().into_bytes(),
        RedisArg::Bytes(v) => v.clone(),
        RedisArg::Int(v) => v.to_string().into_bytes(),
    }
}

fn arg_int(arg: &RedisArg) -> i64 {
    match arg {
        RedisArg::Int(v) => *v,
        RedisArg::Str(v) => v.parse().unwrap_or(0),
        RedisArg::Bytes(v) => String::from_utf8_lossy(v).parse().unwrap_or(0),
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    // '*' wildcards only - enough for the cache's key patterns.
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            let Some(tail) = rest.strip_prefix(part) else { return false };
            rest = tail;
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            let Some(pos) = rest.find(part) else { return false };
            rest = &rest[pos + part.len()..];
        }
    }
    true
}

impl MockRedis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exec_count(&self) -> u64 {
        self.exec_count.load(Ordering::Relaxed)
    }

    pub fn pipeline_count(&self) -> u64 {
        self.pipeline_count.load(Ordering::Relaxed)
    }

    pub fn script_count(&self) -> u64 {
        self.script_count.load(Ordering::Relaxed)
    }

    /// Raw value access for assertions.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().get_live(key)
    }

    /// Remaining member count of a set key.
    pub fn set_len(&self, key: &str) -> usize {
        self.store.lock().sets.get(key).map_or(0, HashSet::len)
    }

    pub fn key_count(&self) -> usize {
        self.store.lock().strings.len()
    }

    /// Drop a string key directly (simulates server-side expiry).
    pub fn evict(&self, key: &str) {
        self.store.lock().strings.remove(key);
    }

    fn apply(&self, cmd: &RedisCommand) -> RedisValue {
        let mut store = self.store.lock();
        let args = &cmd.args;
        match cmd.name {
            "GET" => match store.get_live(&arg_str(&args[0])) {
                Some(v) => RedisValue::Data(v),
                None => RedisValue::Nil,
            },
            "GETEX" => {
                let key = arg_str(&args[0]);
                let value = store.get_live(&key);
                if let Some(v) = &value {
                    // GETEX key EX seconds
                    if args.len() >= 3 {
                        let secs = arg_int(&args[2]).max(0) as u64;
                        let expiry = Instant::now() + Duration::from_secs(secs);
                        store.strings.insert(key, (v.clone(), Some(expiry)));
                    }
                }
                value.map_or(RedisValue::Nil, RedisValue::Data)
            }
            "SET" => {
                store.strings.insert(arg_str(&args[0]), (arg_bytes(&args[1]), None));
                RedisValue::Status("OK".to_string())
            }
            "SETEX" => {
                let secs = arg_int(&args[1]).max(0) as u64;
                let expiry = Instant::now() + Duration::from_secs(secs);
                store
                    .strings
                    .insert(arg_str(&args[0]), (arg_bytes(&args[2]), Some(expiry)));
                RedisValue::Status("OK".to_string())
            }
            "DEL" | "UNLINK" => {
                let mut n = 0;
                for arg in args {
                    n += store.del(&arg_str(arg));
                }
                RedisValue::Int(n)
            }
            "EXPIRE" => {
                let key = arg_str(&args[0]);
                let secs = arg_int(&args[1]).max(0) as u64;
                let nx = args.len() > 2 && arg_str(&args[2]).eq_ignore_ascii_case("NX");
                if let Some((value, expiry)) = store.strings.get(&key).cloned() {
                    if !(nx && expiry.is_some()) {
                        let new_expiry = Instant::now() + Duration::from_secs(secs);
                        store.strings.insert(key, (value, Some(new_expiry)));
                    }
                    return RedisValue::Int(1);
                }
                // Sets and hashes: expiry tracked as "present" only.
                if store.sets.contains_key(&key) || store.hashes.contains_key(&key) {
                    return RedisValue::Int(1);
                }
                RedisValue::Int(0)
            }
            "SADD" => {
                let set = store.sets.entry(arg_str(&args[0])).or_default();
                let mut added = 0;
                for member in &args[1..] {
                    if set.insert(arg_str(member)) {
                        added += 1;
                    }
                }
                RedisValue::Int(added)
            }
            "SREM" => {
                let mut removed = 0;
                if let Some(set) = store.sets.get_mut(&arg_str(&args[0])) {
                    for member in &args[1..] {
                        if set.remove(&arg_str(member)) {
                            removed += 1;
                        }
                    }
                }
                RedisValue::Int(removed)
            }
            "SMEMBERS" => match store.sets.get(&arg_str(&args[0])) {
                Some(set) => RedisValue::Array(
                    set.iter()
                        .map(|m| RedisValue::Data(m.clone().into_bytes()))
                        .collect(),
                ),
                None => RedisValue::Array(Vec::new()),
            },
            "HSET" => {
                let hash = store.hashes.entry(arg_str(&args[0])).or_default();
                hash.insert(arg_str(&args[1]), arg_str(&args[2]));
                RedisValue::Int(1)
            }
            "HKEYS" => match store.hashes.get(&arg_str(&args[0])) {
                Some(hash) => RedisValue::Array(
                    hash.keys()
                        .map(|k| RedisValue::Data(k.clone().into_bytes()))
                        .collect(),
                ),
                None => RedisValue::Array(Vec::new()),
            },
            "SCAN" => {
                // Single-pass scan: return everything matching, cursor 0.
                let mut pattern = "*".to_string();
                let mut i = 1;
                while i + 1 < args.len() {
                    if arg_str(&args[i]).eq_ignore_ascii_case("MATCH") {
                        pattern = arg_str(&args[i + 1]);
                    }
                    i += 2;
                }
                let keys: Vec<RedisValue> = store
                    .strings
                    .keys()
                    .filter(|k| glob_match(&pattern, k))
                    .map(|k| RedisValue::Data(k.clone().into_bytes()))
                    .collect();
                RedisValue::Array(vec![
                    RedisValue::Data(b"0".to_vec()),
                    RedisValue::Array(keys),
                ])
            }
            other => RedisValue::Status(format!("ERR unknown mock command {other}")),
        }
    }

    fn run_selective(
        &self,
        tracking_key: &str,
        decide: impl Fn(&ListBoundsHeader) -> bool,
    ) -> i64 {
        let mut store = self.store.lock();
        let members: Vec<String> = store
            .sets
            .get(tracking_key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        let total = members.len();
        let mut count = 0;

        for page_key in members {
            let header = store
                .get_live(&page_key)
                .as_deref()
                .and_then(ListBoundsHeader::decode);
            // Pages without a decodable header are deleted.
            let should_del = header.as_ref().map_or(true, &decide);
            if should_del {
                store.strings.remove(&page_key);
                if let Some(set) = store.sets.get_mut(tracking_key) {
                    set.remove(&page_key);
                }
                count += 1;
            }
        }
        if count == total as i64 {
            store.sets.remove(tracking_key);
        }
        count
    }
}

#[async_trait]
impl RedisProvider for MockRedis {
    async fn exec(&self, cmd: RedisCommand) -> Result<RedisValue> {
        self.exec_count.fetch_add(1, Ordering::Relaxed);
        Ok(self.apply(&cmd))
    }

    async fn pipeline_exec(&self, cmds: Vec<RedisCommand>) -> Result<Vec<RedisValue>> {
        self.pipeline_count.fetch_add(1, Ordering::Relaxed);
        Ok(cmds.iter().map(|c| self.apply(c)).collect())
    }

    async fn eval_script(
        &self,
        script: &'static str,
        keys: &[String],
        args: &[RedisArg],
    ) -> Result<RedisValue> {
        self.script_count.fetch_add(1, Ordering::Relaxed);
        let tracking_key = keys.first().cloned().unwrap_or_default();

        if std::ptr::eq(script, scripts::INVALIDATE_GROUP) {
            let mut store = self.store.lock();
            let members: Vec<String> = store
                .sets
                .remove(&tracking_key)
                .map(|s| s.into_iter().collect())
                .unwrap_or_default();
            let count = members.len() as i64;
            for key in members {
                store.strings.remove(&key);
            }
            return Ok(RedisValue::Int(count));
        }

        if std::ptr::eq(script, scripts::INVALIDATE_GROUP_SELECTIVE) {
            let value = arg_int(&args[0]);
            let count = self.run_selective(&tracking_key, |h| h.affected_by(value));
            return Ok(RedisValue::Int(count));
        }

        if std::ptr::eq(script, scripts::INVALIDATE_GROUP_SELECTIVE_UPDATE) {
            let old = arg_int(&args[0]);
            let new = arg_int(&args[1]);
            let count =
                self.run_selective(&tracking_key, |h| h.affected_by_update(old, new));
            return Ok(RedisValue::Int(count));
        }

        Err(CacheError::Script { message: "unknown script in mock".to_string() }.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setex_get_del_roundtrip() {
        let redis = MockRedis::new();
        redis
            .exec(RedisCommand::new("SETEX").arg("k").arg(60i64).arg("v"))
            .await
            .unwrap();
        let got = redis.exec(RedisCommand::new("GET").arg("k")).await.unwrap();
        assert_eq!(got, RedisValue::Data(b"v".to_vec()));

        redis.exec(RedisCommand::new("DEL").arg("k")).await.unwrap();
        let gone = redis.exec(RedisCommand::new("GET").arg("k")).await.unwrap();
        assert!(gone.is_nil());
    }

    #[tokio::test]
    async fn sets_and_scan() {
        let redis = MockRedis::new();
        redis
            .exec(RedisCommand::new("SADD").arg("s").arg("a").arg("b"))
            .await
            .unwrap();
        assert_eq!(redis.set_len("s"), 2);

        redis
            .exec(RedisCommand::new("SET").arg("item:1").arg("x"))
            .await
            .unwrap();
        redis
            .exec(RedisCommand::new("SET").arg("other:1").arg("y"))
            .await
            .unwrap();
        let reply = redis
            .exec(
                RedisCommand::new("SCAN")
                    .arg(0i64)
                    .arg("MATCH")
                    .arg("item:*")
                    .arg("COUNT")
                    .arg(100i64),
            )
            .await
            .unwrap();
        let parts = reply.as_array().unwrap();
        assert_eq!(parts[1].as_array().unwrap().len(), 1);
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match("item:*", "item:1"));
        assert!(glob_match("*:dlist:*", "x:dlist:p:1"));
        assert!(!glob_match("item:*", "other:1"));
        assert!(glob_match("exact", "exact"));
    }
}
