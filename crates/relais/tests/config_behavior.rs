#![allow(clippy::unwrap_used)]

//! Per-knob configuration behavior: update strategies, TTL read policy,
//! read-only repositories.

use std::sync::Arc;
use std::time::Duration;

use relais::config::{UpdateStrategy, LOCAL};
use relais::L1Repo;
use relais_test_utils::{TestItem, TestItemStore};

fn l1(store: &Arc<TestItemStore>, cfg: relais::config::CacheConfig) -> L1Repo<TestItem> {
    let repo = L1Repo::l1(store.clone(), cfg, None);
    repo.warmup();
    repo
}

// =============================================================================
// update_strategy
// =============================================================================

#[tokio::test]
async fn lazy_reload_invalidates_and_refetches() {
    let store = Arc::new(TestItemStore::new());
    let repo = l1(
        &store,
        LOCAL.with_update_strategy(UpdateStrategy::InvalidateAndLazyReload),
    );

    let id = store.insert_row(TestItem::new("lazy", 10));
    repo.find(&id).await.unwrap();

    let mut updated = store.row(id).unwrap();
    updated.name = "lazy-updated".to_string();
    updated.value = 20;
    assert!(repo.update(&id, updated).await.unwrap());

    // Next read fetches from the database (cache was invalidated).
    let selects = store.select_calls();
    let item = repo.find(&id).await.unwrap().unwrap();
    assert_eq!(item.name, "lazy-updated");
    assert_eq!(store.select_calls(), selects + 1);
}

#[tokio::test]
async fn populate_immediately_writes_through() {
    let store = Arc::new(TestItemStore::new());
    let repo = l1(
        &store,
        LOCAL.with_update_strategy(UpdateStrategy::PopulateImmediately),
    );

    let id = store.insert_row(TestItem::new("pop", 10));
    repo.find(&id).await.unwrap();

    let mut updated = store.row(id).unwrap();
    updated.name = "pop-updated".to_string();
    assert!(repo.update(&id, updated).await.unwrap());

    // A sneaky direct database change stays invisible: L1 serves the
    // written-through value.
    store.update_row(id, "sneaky", 99);
    let item = repo.find(&id).await.unwrap().unwrap();
    assert_eq!(item.name, "pop-updated");
}

// =============================================================================
// l1_accept_expired_on_get / l1_refresh_on_get
// =============================================================================

#[tokio::test]
async fn accept_expired_serves_stale_until_swept() {
    let store = Arc::new(TestItemStore::new());
    let repo = l1(
        &store,
        LOCAL
            .with_l1_ttl(Duration::from_millis(80))
            .with_l1_accept_expired_on_get(true),
    );

    let id = store.insert_row(TestItem::new("stale-ok", 10));
    repo.find(&id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    store.update_row(id, "fresh", 99);

    // Expired but accepted.
    assert_eq!(repo.find(&id).await.unwrap().unwrap().name, "stale-ok");

    // A full sweep removes it; the next read refetches.
    repo.purge();
    assert_eq!(repo.find(&id).await.unwrap().unwrap().name, "fresh");
}

#[tokio::test]
async fn rejected_expired_entry_refetches_immediately() {
    let store = Arc::new(TestItemStore::new());
    let repo = l1(
        &store,
        LOCAL
            .with_l1_ttl(Duration::from_millis(80))
            .with_l1_accept_expired_on_get(false),
    );

    let id = store.insert_row(TestItem::new("old", 10));
    repo.find(&id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    store.update_row(id, "new", 99);

    assert_eq!(repo.find(&id).await.unwrap().unwrap().name, "new");
}

#[tokio::test]
async fn refresh_on_get_extends_the_entry_lifetime() {
    let store = Arc::new(TestItemStore::new());
    let repo = l1(
        &store,
        LOCAL
            .with_l1_ttl(Duration::from_millis(400))
            .with_l1_refresh_on_get(true),
    );

    let id = store.insert_row(TestItem::new("refreshed", 10));
    repo.find(&id).await.unwrap();

    // Read at 250 ms extends the expiry by another 400 ms.
    tokio::time::sleep(Duration::from_millis(250)).await;
    repo.find(&id).await.unwrap();

    // 500 ms after creation - past the original TTL but inside the
    // extension: still served from cache.
    tokio::time::sleep(Duration::from_millis(250)).await;
    store.update_row(id, "fresh", 99);
    assert_eq!(repo.find(&id).await.unwrap().unwrap().name, "refreshed");
}

// =============================================================================
// read_only
// =============================================================================

#[tokio::test]
async fn read_only_repository_still_serves_and_caches() {
    let store = Arc::new(TestItemStore::new());
    let id = store.insert_row(TestItem::new("ro", 42));

    let repo = L1Repo::<TestItem>::l1(store.clone(), LOCAL, None).into_read_only();
    repo.warmup();

    // insert/update/patch/erase do not exist on this type; reads work
    // and cache as usual.
    assert_eq!(repo.find(&id).await.unwrap().unwrap().value, 42);
    store.update_row(id, "hidden", 0);
    assert_eq!(repo.find(&id).await.unwrap().unwrap().name, "ro");
}

// =============================================================================
// patch
// =============================================================================

#[tokio::test]
async fn patch_updates_a_column_subset_and_returns_fresh_entity() {
    use relais::db::FieldUpdate;

    let store = Arc::new(TestItemStore::new());
    let repo = l1(&store, LOCAL);

    let id = store.insert_row(TestItem::new("before", 1).in_category("tech", 5));
    repo.find(&id).await.unwrap();

    let patched = repo
        .patch(&id, &[FieldUpdate::new("name", "after"), FieldUpdate::new("value", 2i64)])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(patched.name, "after");
    assert_eq!(patched.value, 2);
    assert_eq!(patched.category, "tech", "untouched columns survive");

    // L1 was invalidated after the patch succeeded; the next read sees
    // the fresh row.
    assert_eq!(repo.find(&id).await.unwrap().unwrap().name, "after");
}

#[tokio::test]
async fn failed_patch_leaves_the_cache_untouched() {
    use relais::db::{DbRow, DbValue, FieldUpdate};
    use relais::entity::EntityMapping;
    use relais_test_utils::MockDb;

    // A database that can serve the select but fails every patch (the
    // dynamic UPDATE statement has no handler registered).
    let db = Arc::new(MockDb::new());
    db.on_query(TestItem::SELECT_BY_PK, |_| {
        Ok(vec![DbRow::new(
            vec![
                "id".to_string(),
                "name".to_string(),
                "value".to_string(),
                "category".to_string(),
                "view_count".to_string(),
            ],
            vec![
                DbValue::Int8(1),
                DbValue::Text("cached".to_string()),
                DbValue::Int8(5),
                DbValue::Text("tech".to_string()),
                DbValue::Int8(7),
            ],
        )])
    });

    let repo = L1Repo::<TestItem>::l1(db.clone(), LOCAL, None);
    repo.warmup();

    repo.find(&1).await.unwrap().unwrap();
    assert_eq!(db.calls(TestItem::SELECT_BY_PK), 1);

    let err = repo
        .patch(&1, &[FieldUpdate::new("name", "wont-happen")])
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "db_query");

    // The failed write left L1 untouched: the cached entry still serves
    // without another database read.
    assert_eq!(repo.find(&1).await.unwrap().unwrap().name, "cached");
    assert_eq!(db.calls(TestItem::SELECT_BY_PK), 1);
}

#[tokio::test]
async fn noop_patch_on_vanished_row_leaves_the_cache_untouched() {
    use relais::db::{DbProvider, FieldUpdate};
    use relais::entity::EntityMapping;

    let store = Arc::new(TestItemStore::new());
    let repo = l1(&store, LOCAL);

    let id = store.insert_row(TestItem::new("cached", 1));
    repo.find(&id).await.unwrap().unwrap();
    let selects = store.select_calls();

    // The row disappears out-of-band; the patch affects nothing.
    store.execute(TestItem::DELETE_BY_PK, &[id.into()]).await.unwrap();
    let result = repo.patch(&id, &[FieldUpdate::new("name", "late")]).await.unwrap();
    assert!(result.is_none());

    // No row changed, so the entry was not invalidated: L1 still serves
    // it without a database read.
    assert_eq!(repo.find(&id).await.unwrap().unwrap().name, "cached");
    assert_eq!(store.select_calls(), selects);
}
