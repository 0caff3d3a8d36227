#![allow(clippy::unwrap_used)]

//! End-to-end tiered read behavior: miss population, per-tier serving,
//! TTL interplay between L1 and L2.

use std::sync::Arc;
use std::time::Duration;

use relais::config::{L2Format, BOTH};
use relais::{L1L2Repo, L2Cache};
use relais_test_utils::{MockDb, MockRedis, TestItem, TestItemStore};

fn repo_over(
    store: &Arc<TestItemStore>,
    redis: &Arc<MockRedis>,
    cfg: relais::config::CacheConfig,
) -> L1L2Repo<TestItem> {
    let repo = L1L2Repo::l1_l2(store.clone(), L2Cache::new(redis.clone()), cfg, None);
    repo.warmup();
    repo
}

#[tokio::test]
async fn read_miss_populates_both_tiers_and_serves_from_l1_then_l2() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let repo = repo_over(&store, &redis, BOTH.with_l2_format(L2Format::Json));

    let id = store.insert_row(TestItem::new("Widget", 42));

    // Miss: populates L2 then L1.
    let found = repo.find(&id).await.unwrap().unwrap();
    assert_eq!(found.name, "Widget");
    assert_eq!(found.value, 42);
    assert_eq!(store.select_calls(), 1);
    assert!(redis.raw(&format!("test_item:{id}")).is_some());

    // Out-of-band database change is invisible: L1 serves.
    store.update_row(id, "Stolen", 99);
    let cached = repo.find(&id).await.unwrap().unwrap();
    assert_eq!(cached.name, "Widget");
    assert_eq!(store.select_calls(), 1);

    // Dropping L1 only falls back to L2, which was not invalidated.
    repo.evict_l1(&id);
    store.update_row(id, "Fresh", 7);
    let from_l2 = repo.find(&id).await.unwrap().unwrap();
    assert_eq!(from_l2.name, "Widget");
    assert_eq!(from_l2.value, 42);
    assert_eq!(store.select_calls(), 1);

    let metrics = repo.metrics();
    assert!(metrics.l1_hits >= 1);
    assert!(metrics.l2_hits >= 1);
}

#[tokio::test]
async fn absent_entity_returns_none_not_error() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let repo = repo_over(&store, &redis, BOTH);

    assert!(repo.find(&999).await.unwrap().is_none());
}

#[tokio::test]
async fn l1_ttl_expiry_falls_back_to_l2() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let cfg = BOTH
        .with_l1_ttl(Duration::from_millis(150))
        .with_l2_ttl(Duration::from_secs(3600));
    let repo = repo_over(&store, &redis, cfg);

    let id = store.insert_row(TestItem::new("stable", 1));
    repo.find(&id).await.unwrap().unwrap();
    assert_eq!(repo.l1_len(), 1);

    // Let the entry expire (cached clock ticks every 100 ms), then sweep
    // it out of L1.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let removed = repo.purge();
    assert!(removed >= 1, "expired entry should be swept");
    assert_eq!(repo.l1_len(), 0);

    // L2 still holds the old serialization: the next read serves it and
    // repopulates L1 without touching the database.
    store.update_row(id, "changed", 2);
    let served = repo.find(&id).await.unwrap().unwrap();
    assert_eq!(served.name, "stable");
    assert_eq!(store.select_calls(), 1);
    assert_eq!(repo.l1_len(), 1);
}

#[tokio::test]
async fn malformed_l2_payload_is_treated_as_miss_and_dropped() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let repo = repo_over(&store, &redis, BOTH.with_l2_format(L2Format::Json));

    let id = store.insert_row(TestItem::new("good", 5));
    repo.find(&id).await.unwrap();

    // Corrupt the L2 entry and drop L1 so the next read hits L2.
    let key = format!("test_item:{id}");
    redis.evict(&key);
    use relais::l2::{RedisCommand, RedisProvider};
    redis
        .exec(RedisCommand::new("SETEX").arg(key.as_str()).arg(3600i64).arg("{not json"))
        .await
        .unwrap();
    repo.evict_l1(&id);

    // Falls through to L3 and self-heals.
    let served = repo.find(&id).await.unwrap().unwrap();
    assert_eq!(served.name, "good");
    assert_eq!(store.select_calls(), 2);
}

#[tokio::test]
async fn find_as_json_and_binary_roundtrip() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let repo = repo_over(&store, &redis, BOTH.with_l2_format(L2Format::Json));

    let id = store.insert_row(TestItem::new("serialized", 9).in_category("tech", 3));

    let json = repo.find_as_json(&id).await.unwrap().unwrap();
    let parsed: TestItem = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.name, "serialized");

    let bin = repo.find_as_binary(&id).await.unwrap().unwrap();
    use relais::entity::Entity;
    assert_eq!(TestItem::from_binary(&bin).unwrap().name, "serialized");

    assert!(repo.find_as_json(&12345).await.unwrap().is_none());
}

#[tokio::test]
async fn uncached_repository_reads_the_database_every_time() {
    use relais::UncachedRepo;

    let store = Arc::new(TestItemStore::new());
    let repo: UncachedRepo<TestItem> = UncachedRepo::uncached(store.clone());

    let id = store.insert_row(TestItem::new("raw", 1));
    repo.find(&id).await.unwrap();
    store.update_row(id, "raw-2", 2);
    let fresh = repo.find(&id).await.unwrap().unwrap();
    assert_eq!(fresh.name, "raw-2");
    assert_eq!(store.select_calls(), 2);
}

#[tokio::test]
async fn l2_only_repository_shares_through_redis_without_l1() {
    use relais::config::REDIS;
    use relais::L2Repo;

    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let repo: L2Repo<TestItem> = L2Repo::l2(
        store.clone(),
        L2Cache::new(redis.clone()),
        REDIS.with_l2_format(L2Format::Json),
    );
    repo.warmup();

    let id = store.insert_row(TestItem::new("shared", 1));
    repo.find(&id).await.unwrap();
    assert_eq!(repo.l1_len(), 0, "no in-process cache at this level");

    // A second repository instance over the same Redis sees the entry.
    let other_store = Arc::new(TestItemStore::new());
    let other: L2Repo<TestItem> = L2Repo::l2(
        other_store.clone(),
        L2Cache::new(redis.clone()),
        REDIS.with_l2_format(L2Format::Json),
    );
    let served = other.find(&id).await.unwrap().unwrap();
    assert_eq!(served.name, "shared");
    assert_eq!(other_store.select_calls(), 0, "served from the shared tier");
}

#[tokio::test]
async fn erase_and_invalidate_are_idempotent() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let repo = repo_over(&store, &redis, BOTH);

    let id = store.insert_row(TestItem::new("gone", 1));
    repo.find(&id).await.unwrap().unwrap();

    assert_eq!(repo.erase(&id).await.unwrap(), 1);
    assert!(repo.find(&id).await.unwrap().is_none());
    assert_eq!(repo.erase(&id).await.unwrap(), 0);

    repo.invalidate(&id).await;
    repo.invalidate(&id).await;
    assert!(repo.find(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn database_errors_propagate_and_skip_cache_population() {
    use relais::entity::EntityMapping;

    // A database that fails every statement: reads must surface the
    // error once both cache tiers miss, and nothing may be cached.
    let db = Arc::new(MockDb::new());
    db.on_query(TestItem::SELECT_BY_PK, |_| {
        Err(relais::DbError::Query {
            message: "connection lost".to_string(),
            sql_state: None,
        }
        .into())
    });
    let redis = Arc::new(MockRedis::new());
    let repo: L1L2Repo<TestItem> =
        L1L2Repo::l1_l2(db.clone(), L2Cache::new(redis.clone()), BOTH, None);
    repo.warmup();

    let err = repo.find(&1).await.unwrap_err();
    assert_eq!(err.error_code(), "db_query");
    assert_eq!(repo.l1_len(), 0);
    assert_eq!(redis.key_count(), 0);
    assert_eq!(db.calls(TestItem::SELECT_BY_PK), 1);
}

#[tokio::test]
async fn pattern_invalidation_clears_matching_keys() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let repo = repo_over(&store, &redis, BOTH.with_l2_format(L2Format::Json));

    let a = store.insert_row(TestItem::new("a", 1));
    let b = store.insert_row(TestItem::new("b", 2));
    repo.find(&a).await.unwrap();
    repo.find(&b).await.unwrap();
    assert_eq!(redis.key_count(), 2);

    let l2 = L2Cache::new(redis.clone());
    let removed = l2.invalidate_pattern("test_item:*", 100).await;
    assert_eq!(removed, 2);
    assert_eq!(redis.key_count(), 0);
}

#[tokio::test]
async fn insert_through_repository_is_immediately_readable() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let repo = repo_over(&store, &redis, BOTH);

    let inserted = repo
        .insert(TestItem::new("fresh", 3).in_category("tech", 50))
        .await
        .unwrap();
    assert!(inserted.id > 0, "server-assigned key");

    // Served from L1, no further database read.
    let selects = store.select_calls();
    let found = repo.find(&inserted.id).await.unwrap().unwrap();
    assert_eq!(*found, *inserted);
    assert_eq!(store.select_calls(), selects);
}
