#![allow(clippy::unwrap_used)]

//! End-to-end list caching: pagination, bounds-driven selective
//! invalidation across both tiers, boundary behaviors.

use std::sync::Arc;

use relais::config::{CacheConfig, L2Format, BOTH, LOCAL};
use relais::list::{build_query, Cursor, Pagination};
use relais::{L1L2Repo, L1Repo, L2Cache, ListRepository};
use relais_test_utils::{
    MockRedis, TestItem, TestItemFilters, TestItemStore, TestItemsByCategory,
};

type Lists = ListRepository<
    TestItemsByCategory,
    relais::repository::MemoryTier<
        TestItem,
        relais::repository::RedisTier<TestItem, relais::repository::DbTier<TestItem>>,
    >,
>;

fn list_repo(store: &Arc<TestItemStore>, redis: &Arc<MockRedis>, cfg: CacheConfig) -> Lists {
    let l2 = L2Cache::new(redis.clone());
    let repo = L1L2Repo::l1_l2(store.clone(), l2.clone(), cfg, None);
    repo.warmup();
    ListRepository::new(repo, store.clone(), Some(l2), cfg)
}

fn seed_tech(store: &TestItemStore) {
    for vc in [100, 90, 80, 70, 60, 50, 40, 30, 20, 10] {
        store.insert_row(TestItem::new("post", 0).in_category("tech", vc));
    }
}

fn tech_query(limit: u16, pagination: Pagination) -> relais::list::ListQuery<TestItemFilters> {
    build_query::<TestItemsByCategory>(TestItemFilters::category("tech"), None, limit, pagination)
}

fn views(page: &relais::list::ListPage<TestItem, TestItemFilters>) -> Vec<i64> {
    page.items.iter().map(|i| i.view_count).collect()
}

#[tokio::test]
async fn selective_invalidation_spares_unaffected_pages() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let lists = list_repo(&store, &redis, BOTH.with_l2_format(L2Format::Json));
    seed_tech(&store);

    // Page 0 (offset): the five highest view counts.
    let q0 = tech_query(5, Pagination::Offset(0));
    let page0 = lists.query(&q0).await.unwrap();
    assert_eq!(views(&page0), vec![100, 90, 80, 70, 60]);
    let cursor = Cursor::decode(page0.next_cursor.as_deref().unwrap()).unwrap();
    assert_eq!(cursor.sort_value, 60);

    // Page 1 (cursor): the rest.
    let q1 = tech_query(5, Pagination::Cursor(cursor));
    let page1 = lists.query(&q1).await.unwrap();
    assert_eq!(views(&page1), vec![50, 40, 30, 20, 10]);
    assert_eq!(store.list_calls(), 2);

    // Insert a row between the pages: 55 lies after page 0's interval
    // and inside page 1's cursor-anchored interval.
    lists
        .insert(TestItem::new("new", 0).in_category("tech", 55))
        .await
        .unwrap();

    // Page 0 is untouched and still served from cache.
    let page0_again = lists.query(&q0).await.unwrap();
    assert_eq!(views(&page0_again), vec![100, 90, 80, 70, 60]);
    assert_eq!(store.list_calls(), 2, "page 0 must not re-query");

    // Page 1 was invalidated in both tiers and now includes the new row.
    let page1_again = lists.query(&q1).await.unwrap();
    assert_eq!(views(&page1_again), vec![55, 50, 40, 30, 20]);
    assert_eq!(store.list_calls(), 3);

    // L2 agrees: page 0's key survived the selective script, page 1's
    // did not (it was re-created by the re-query just above, so check
    // the script ran at all instead).
    assert!(redis.script_count() > 0);
    assert!(redis
        .raw(&format!("test_item:dlist:p:{}", q0.cache_key))
        .is_some());
}

#[tokio::test]
async fn unrelated_category_write_spares_cached_pages() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let lists = list_repo(&store, &redis, BOTH);
    seed_tech(&store);

    let q = tech_query(5, Pagination::Offset(0));
    lists.query(&q).await.unwrap();
    assert_eq!(store.list_calls(), 1);

    lists
        .insert(TestItem::new("recipe", 0).in_category("cooking", 500))
        .await
        .unwrap();

    lists.query(&q).await.unwrap();
    assert_eq!(store.list_calls(), 1, "tech page served from cache");
}

#[tokio::test]
async fn empty_result_returns_empty_page_without_cursor() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let lists = list_repo(&store, &redis, BOTH);

    let q = tech_query(5, Pagination::Offset(0));
    let page = lists.query(&q).await.unwrap();
    assert!(page.items.is_empty());
    assert!(page.next_cursor.is_none());
    assert!(page.incomplete);
}

#[tokio::test]
async fn exact_limit_page_sets_cursor_short_page_does_not() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let lists = list_repo(&store, &redis, BOTH);
    for vc in [30, 20, 10, 40, 50] {
        store.insert_row(TestItem::new("n", 0).in_category("tech", vc));
    }

    let full = lists.query(&tech_query(5, Pagination::Offset(0))).await.unwrap();
    assert_eq!(full.items.len(), 5);
    assert!(full.next_cursor.is_some(), "exactly limit items sets a cursor");

    let store2 = Arc::new(TestItemStore::new());
    let redis2 = Arc::new(MockRedis::new());
    let lists2 = list_repo(&store2, &redis2, BOTH);
    for vc in [30, 20, 10] {
        store2.insert_row(TestItem::new("n", 0).in_category("tech", vc));
    }
    let short = lists2.query(&tech_query(5, Pagination::Offset(0))).await.unwrap();
    assert_eq!(short.items.len(), 3);
    assert!(short.next_cursor.is_none());
    assert!(short.incomplete);
}

#[tokio::test]
async fn update_moving_sort_value_invalidates_covering_pages() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let lists = list_repo(&store, &redis, BOTH);
    seed_tech(&store);

    let q = tech_query(5, Pagination::Offset(0));
    let page = lists.query(&q).await.unwrap();
    assert_eq!(views(&page), vec![100, 90, 80, 70, 60]);

    // Move the bottom row into the top page's interval.
    let moved_id = store.row(10).map_or_else(
        || panic!("row 10 missing"),
        |r| {
            assert_eq!(r.view_count, 10);
            r.id
        },
    );
    let mut updated = store.row(moved_id).unwrap();
    updated.view_count = 95;
    lists.update(&moved_id, updated).await.unwrap();

    let fresh = lists.query(&q).await.unwrap();
    assert_eq!(views(&fresh), vec![100, 95, 90, 80, 70]);
    assert_eq!(store.list_calls(), 2);
}

#[tokio::test]
async fn erase_through_list_repo_refreshes_pages() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let lists = list_repo(&store, &redis, BOTH);
    seed_tech(&store);

    let q = tech_query(5, Pagination::Offset(0));
    lists.query(&q).await.unwrap();

    // Erase the top row (view 100, first inserted).
    let top_id = 1;
    assert_eq!(lists.erase(&top_id).await.unwrap(), 1);

    let fresh = lists.query(&q).await.unwrap();
    assert_eq!(views(&fresh), vec![90, 80, 70, 60, 50]);
}

#[tokio::test]
async fn query_as_json_serves_array() {
    let store = Arc::new(TestItemStore::new());
    let redis = Arc::new(MockRedis::new());
    let lists = list_repo(&store, &redis, BOTH.with_l2_format(L2Format::Json));
    seed_tech(&store);

    let q = tech_query(5, Pagination::Offset(0));
    let json = lists.query_as_json(&q).await.unwrap();
    let parsed: Vec<TestItem> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.len(), 5);
    assert_eq!(parsed[0].view_count, 100);
}

#[tokio::test]
async fn l1_only_list_cache_works_without_redis() {
    let store = Arc::new(TestItemStore::new());
    let cfg = LOCAL;
    let repo = L1Repo::l1(store.clone(), cfg, None);
    repo.warmup();
    let lists: ListRepository<TestItemsByCategory, _> =
        ListRepository::new(repo, store.clone(), None, cfg);
    seed_tech(&store);

    let q = tech_query(5, Pagination::Offset(0));
    let first = lists.query(&q).await.unwrap();
    assert_eq!(views(&first), vec![100, 90, 80, 70, 60]);
    assert_eq!(store.list_calls(), 1);

    let second = lists.query(&q).await.unwrap();
    assert_eq!(views(&second), vec![100, 90, 80, 70, 60]);
    assert_eq!(store.list_calls(), 1, "served from L1");

    lists
        .insert(TestItem::new("n", 0).in_category("tech", 85))
        .await
        .unwrap();
    let third = lists.query(&q).await.unwrap();
    assert_eq!(views(&third), vec![100, 90, 85, 80, 70]);
    assert_eq!(store.list_calls(), 2);
}
