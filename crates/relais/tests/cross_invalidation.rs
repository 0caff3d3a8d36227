#![allow(clippy::unwrap_used)]

//! Declarative cross-repository invalidation.

use std::sync::Arc;
use std::time::Duration;

use relais::config::{BOTH, LOCAL};
use relais::list::{build_query, Pagination};
use relais::repository::KeyInvalidatable;
use relais::{invalidate_key, invalidate_key_resolved, invalidate_list, L1L2Repo, L1Repo, L2Cache, ListRepository};
use relais_test_utils::{
    MockRedis, TestItem, TestItemFilters, TestItemStore, TestItemsByCategory,
};

#[tokio::test]
async fn related_write_invalidates_both_cache_tiers_of_the_target() {
    // "Users" cached L1+L2; "purchases" reference a user through their
    // value column.
    let user_store = Arc::new(TestItemStore::new());
    let user_redis = Arc::new(MockRedis::new());
    let users = Arc::new(L1L2Repo::<TestItem>::l1_l2(
        user_store.clone(),
        L2Cache::new(user_redis.clone()),
        BOTH,
        None,
    ));
    users.warmup();

    let purchase_store = Arc::new(TestItemStore::new());
    let target: Arc<dyn KeyInvalidatable<i64>> = users.clone();
    let purchases = L1Repo::<TestItem>::l1(purchase_store.clone(), LOCAL, None)
        .with_rule(invalidate_key(target, |purchase: &TestItem| {
            vec![i64::from(purchase.value)]
        }));

    // Cache the user in both tiers.
    let uid = user_store.insert_row(TestItem::new("alice", 0));
    users.find(&uid).await.unwrap().unwrap();
    assert_eq!(user_store.select_calls(), 1);

    // The user row changes; the stale value is served until the related
    // write lands.
    user_store.update_row(uid, "alice-updated", 1);
    assert_eq!(users.find(&uid).await.unwrap().unwrap().name, "alice");

    // A purchase for user 7 fires the rule: both tiers drop the entry.
    #[allow(clippy::cast_possible_truncation)]
    purchases
        .insert(TestItem::new("purchase", uid as i32))
        .await
        .unwrap();

    let fresh = users.find(&uid).await.unwrap().unwrap();
    assert_eq!(fresh.name, "alice-updated");
    assert_eq!(user_store.select_calls(), 2, "read went back to the database");
}

#[tokio::test]
async fn resolver_rule_invalidates_asynchronously_resolved_keys() {
    let user_store = Arc::new(TestItemStore::new());
    let users = Arc::new(L1Repo::<TestItem>::l1(user_store.clone(), LOCAL, None));
    users.warmup();

    let uid = user_store.insert_row(TestItem::new("bob", 0));
    users.find(&uid).await.unwrap().unwrap();

    let purchase_store = Arc::new(TestItemStore::new());
    let target: Arc<dyn KeyInvalidatable<i64>> = users.clone();
    let purchases = L1Repo::<TestItem>::l1(purchase_store.clone(), LOCAL, None).with_rule(
        invalidate_key_resolved(target, move |purchase: Arc<TestItem>| {
            // Key resolved through an async lookup (here: trivial).
            Box::pin(async move { vec![i64::from(purchase.value)] })
        }),
    );

    user_store.update_row(uid, "bob-updated", 1);
    #[allow(clippy::cast_possible_truncation)]
    purchases
        .insert(TestItem::new("purchase", uid as i32))
        .await
        .unwrap();

    assert_eq!(users.find(&uid).await.unwrap().unwrap().name, "bob-updated");
}

#[tokio::test]
async fn list_target_rule_notifies_the_target_list_cache() {
    // A list repository over the entity, and a second plain repository
    // whose writes must refresh the list.
    let store = Arc::new(TestItemStore::new());
    let lists = Arc::new({
        let repo = L1Repo::<TestItem>::l1(store.clone(), LOCAL, None);
        repo.warmup();
        ListRepository::<TestItemsByCategory, _>::new(repo, store.clone(), None, LOCAL)
    });

    let writer = L1Repo::<TestItem>::l1(store.clone(), LOCAL, None)
        .with_rule(invalidate_list(lists.clone()));

    for vc in [30, 20, 10] {
        store.insert_row(TestItem::new("seed", 0).in_category("tech", vc));
    }

    let q = build_query::<TestItemsByCategory>(
        TestItemFilters::category("tech"),
        None,
        5,
        Pagination::Offset(0),
    );
    let page = lists.query(&q).await.unwrap();
    assert_eq!(page.items.len(), 3);
    assert_eq!(store.list_calls(), 1);

    // Write through the *other* repository; the rule forwards it to the
    // list cache, which applies its own bounds logic.
    writer
        .insert(TestItem::new("new", 0).in_category("tech", 25))
        .await
        .unwrap();

    // Give the fire-and-forget L2 part a tick (L1 is synchronous).
    tokio::time::sleep(Duration::from_millis(10)).await;

    let fresh = lists.query(&q).await.unwrap();
    let views: Vec<i64> = fresh.items.iter().map(|i| i.view_count).collect();
    assert_eq!(views, vec![30, 25, 20, 10]);
    assert_eq!(store.list_calls(), 2);
}

#[tokio::test]
async fn group_resolver_rule_invalidates_resolved_list_groups() {
    use relais::list::group_key;
    use relais::repository::GroupInvalidatable;
    use relais::invalidate_list_group;

    let store = Arc::new(TestItemStore::new());
    let lists = Arc::new({
        let repo = L1Repo::<TestItem>::l1(store.clone(), LOCAL, None);
        repo.warmup();
        ListRepository::<TestItemsByCategory, _>::new(repo, store.clone(), None, LOCAL)
    });

    for vc in [30, 20, 10] {
        store.insert_row(TestItem::new("seed", 0).in_category("tech", vc));
    }
    let q = build_query::<TestItemsByCategory>(
        TestItemFilters::category("tech"),
        None,
        5,
        Pagination::Offset(0),
    );
    lists.query(&q).await.unwrap();
    assert_eq!(lists.list_len(), 1);

    // The resolver maps any written entity to the "tech" group.
    let target: Arc<dyn GroupInvalidatable> = lists.clone();
    let writer_store = Arc::new(TestItemStore::new());
    let writer = L1Repo::<TestItem>::l1(writer_store, LOCAL, None).with_rule(
        invalidate_list_group(
            target,
            |_entity: Arc<TestItem>| {
                Box::pin(async {
                    Some(group_key::<TestItemsByCategory>(&TestItemFilters::category(
                        "tech",
                    )))
                })
            },
            |entity: &TestItem| entity.view_count,
        ),
    );

    writer
        .insert(TestItem::new("elsewhere", 0).in_category("tech", 25))
        .await
        .unwrap();

    assert_eq!(lists.list_len(), 0, "resolved group's pages were dropped");
}

#[tokio::test]
async fn rule_failures_do_not_fail_the_write() {
    // A rule whose resolver panics inside a spawned future would poison
    // nothing; here we verify the benign case: a rule targeting an
    // entity that does not exist anywhere simply invalidates nothing.
    let store = Arc::new(TestItemStore::new());
    let ghost_store = Arc::new(TestItemStore::new());
    let ghosts = Arc::new(L1Repo::<TestItem>::l1(ghost_store, LOCAL, None));

    let target: Arc<dyn KeyInvalidatable<i64>> = ghosts;
    let repo = L1Repo::<TestItem>::l1(store.clone(), LOCAL, None)
        .with_rule(invalidate_key(target, |_: &TestItem| vec![424_242]));

    let inserted = repo.insert(TestItem::new("fine", 1)).await.unwrap();
    assert!(inserted.id > 0);
}

#[tokio::test]
async fn rules_do_not_cascade_through_targets() {
    // a -> b declared; b -> c declared. A write on a must invalidate b
    // but not fire b's own rules against c.
    let store_a = Arc::new(TestItemStore::new());
    let store_b = Arc::new(TestItemStore::new());
    let store_c = Arc::new(TestItemStore::new());

    let c = Arc::new(L1Repo::<TestItem>::l1(store_c.clone(), LOCAL, None));
    let c_target: Arc<dyn KeyInvalidatable<i64>> = c.clone();

    let b = Arc::new(
        L1Repo::<TestItem>::l1(store_b.clone(), LOCAL, None)
            .with_rule(invalidate_key(c_target, |_: &TestItem| vec![1])),
    );
    let b_target: Arc<dyn KeyInvalidatable<i64>> = b.clone();

    let a = L1Repo::<TestItem>::l1(store_a.clone(), LOCAL, None)
        .with_rule(invalidate_key(b_target, |_: &TestItem| vec![1]));

    // Cache an entry in b and in c.
    let bid = store_b.insert_row(TestItem::new("b", 0));
    b.find(&bid).await.unwrap();
    let cid = store_c.insert_row(TestItem::new("c", 0));
    c.find(&cid).await.unwrap();

    store_b.update_row(bid, "b2", 0);
    store_c.update_row(cid, "c2", 0);

    a.insert(TestItem::new("a", 0)).await.unwrap();

    // b was invalidated (key 1 == bid)...
    assert_eq!(b.find(&bid).await.unwrap().unwrap().name, "b2");
    // ...but c still serves its cached entry: no transitive propagation.
    assert_eq!(c.find(&cid).await.unwrap().unwrap().name, "c");
}
