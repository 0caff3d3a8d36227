//! Fixture entity: an item with a category filter and a view-count sort,
//! plus an in-memory table that interprets the entity's SQL templates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use relais_core::db::{DbProvider, DbRow, DbValue, SqlParam};
use relais_core::entity::{Entity, EntityMapping};
use relais_core::list::{ListDescriptor, SortColumn, SortSpec, WhereClause};
use relais_error::{DbError, Result, SerializeError};
use serde::{Deserialize, Serialize};

/// The fixture entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestItem {
    pub id: i64,
    pub name: String,
    pub value: i32,
    pub category: String,
    pub view_count: i64,
}

impl TestItem {
    pub fn new(name: &str, value: i32) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            value,
            category: "default".to_string(),
            view_count: 0,
        }
    }

    #[must_use]
    pub fn in_category(mut self, category: &str, view_count: i64) -> Self {
        self.category = category.to_string();
        self.view_count = view_count;
        self
    }
}

impl Entity for TestItem {
    type Key = i64;

    const SUPPORTS_BINARY: bool = true;

    fn key(&self) -> i64 {
        self.id
    }

    fn from_row(row: &DbRow) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            name: row.get_text("name")?,
            value: row.get_i32("value")?,
            category: row.get_text("category")?,
            view_count: row.get_i64("view_count")?,
        })
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SerializeError::Json { message: e.to_string() }.into())
    }

    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SerializeError::Json { message: e.to_string() }.into())
    }

    fn to_binary(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| SerializeError::Binary { message: e.to_string() }.into())
    }

    fn from_binary(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| SerializeError::Binary { message: e.to_string() }.into())
    }

    fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.name.capacity() + self.category.capacity()
    }
}

impl EntityMapping for TestItem {
    const NAME: &'static str = "test_item";
    const TABLE: &'static str = "test_items";
    const PRIMARY_KEY_COLUMN: &'static str = "id";

    const SELECT_BY_PK: &'static str = "SELECT * FROM test_items WHERE id = $1";
    const INSERT_RETURNING: &'static str = "INSERT INTO test_items (name, value, category, \
         view_count) VALUES ($1, $2, $3, $4) RETURNING *";
    const UPDATE_BY_PK: &'static str = "UPDATE test_items SET name = $1, value = $2, \
         category = $3, view_count = $4 WHERE id = $5";
    const DELETE_BY_PK: &'static str = "DELETE FROM test_items WHERE id = $1";

    fn insert_params(&self) -> Vec<SqlParam> {
        vec![
            self.name.as_str().into(),
            self.value.into(),
            self.category.as_str().into(),
            self.view_count.into(),
        ]
    }

    fn update_params(&self) -> Vec<SqlParam> {
        vec![
            self.name.as_str().into(),
            self.value.into(),
            self.category.as_str().into(),
            self.view_count.into(),
            self.id.into(),
        ]
    }
}

/// Filter record: one optional value per filterable column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TestItemFilters {
    pub category: Option<String>,
}

impl TestItemFilters {
    pub fn category(category: &str) -> Self {
        Self { category: Some(category.to_string()) }
    }
}

/// List descriptor: filter by category, sort by view count.
pub struct TestItemsByCategory;

impl ListDescriptor for TestItemsByCategory {
    type Entity = TestItem;
    type Filters = TestItemFilters;

    const SORT_COLUMNS: &'static [SortColumn] =
        &[SortColumn { field: "view_count", column: "view_count" }];
    const DEFAULT_SORT: SortSpec = SortSpec::desc(0);
    const DEFAULT_LIMIT: u16 = 10;
    const MAX_LIMIT: u16 = 100;
    const LIMIT_STEPS: &'static [u16] = &[5, 10, 25, 50, 100];

    fn filter_tags(entity: &TestItem) -> TestItemFilters {
        TestItemFilters { category: Some(entity.category.clone()) }
    }

    fn matches(entity: &TestItem, filters: &TestItemFilters) -> bool {
        filters
            .category
            .as_ref()
            .is_none_or(|c| *c == entity.category)
    }

    fn sort_value(entity: &TestItem, _field: usize) -> i64 {
        entity.view_count
    }

    fn pk_value(entity: &TestItem) -> i64 {
        entity.id
    }

    fn build_where(filters: &TestItemFilters) -> WhereClause {
        let mut clause = WhereClause::default();
        if let Some(category) = &filters.category {
            clause.push_eq("category", category.as_str().into());
        }
        clause
    }

    fn visible_filter_records(entity: &TestItem) -> Vec<TestItemFilters> {
        vec![
            TestItemFilters::default(),
            TestItemFilters { category: Some(entity.category.clone()) },
        ]
    }
}

// =============================================================================
// In-memory table
// =============================================================================

fn item_row(item: &TestItem) -> DbRow {
    DbRow::new(
        vec![
            "id".to_string(),
            "name".to_string(),
            "value".to_string(),
            "category".to_string(),
            "view_count".to_string(),
        ],
        vec![
            DbValue::Int8(item.id),
            DbValue::Text(item.name.clone()),
            DbValue::Int8(i64::from(item.value)),
            DbValue::Text(item.category.clone()),
            DbValue::Int8(item.view_count),
        ],
    )
}

fn param_i64(param: &SqlParam) -> i64 {
    match param {
        SqlParam::Int8(v) => *v,
        SqlParam::Int4(v) => i64::from(*v),
        SqlParam::Int2(v) => i64::from(*v),
        _ => 0,
    }
}

fn param_text(param: &SqlParam) -> String {
    match param {
        SqlParam::Text(v) => v.clone(),
        other => format!("{other:?}"),
    }
}

/// In-memory `test_items` table implementing `DbProvider`: interprets the
/// entity's SQL templates plus the generated list and patch statements.
/// Tests mutate it directly to simulate out-of-band database writes.
#[derive(Default)]
pub struct TestItemStore {
    rows: Mutex<BTreeMap<i64, TestItem>>,
    next_id: AtomicI64,
    select_calls: AtomicU64,
    list_calls: AtomicU64,
}

impl TestItemStore {
    pub fn new() -> Self {
        Self { next_id: AtomicI64::new(1), ..Self::default() }
    }

    /// Insert bypassing the repository (no cache effects). Returns the
    /// assigned id.
    pub fn insert_row(&self, mut item: TestItem) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        item.id = id;
        self.rows.lock().insert(id, item);
        id
    }

    /// Direct update bypassing the repository.
    pub fn update_row(&self, id: i64, name: &str, value: i32) {
        if let Some(item) = self.rows.lock().get_mut(&id) {
            item.name = name.to_string();
            item.value = value;
        }
    }

    pub fn row(&self, id: i64) -> Option<TestItem> {
        self.rows.lock().get(&id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// Number of by-key SELECTs that reached the database.
    pub fn select_calls(&self) -> u64 {
        self.select_calls.load(Ordering::Relaxed)
    }

    /// Number of list queries that reached the database.
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    fn run_list_query(&self, sql: &str, params: &[SqlParam]) -> Vec<DbRow> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);

        let desc = sql.contains("ORDER BY COALESCE(\"view_count\", 0) DESC");
        let category = sql
            .contains("\"category\" = $")
            .then(|| param_text(&params[0]));
        let cursor = sql.contains("(COALESCE(\"view_count\", 0), \"id\")").then(|| {
            let n = params.len();
            (param_i64(&params[n - 2]), param_i64(&params[n - 1]))
        });
        let limit = sql
            .split(" LIMIT ")
            .nth(1)
            .and_then(|rest| {
                rest.split_whitespace().next().and_then(|v| v.parse::<usize>().ok())
            })
            .unwrap_or(usize::MAX);
        let offset = sql
            .split(" OFFSET ")
            .nth(1)
            .and_then(|rest| {
                rest.split_whitespace().next().and_then(|v| v.parse::<usize>().ok())
            })
            .unwrap_or(0);

        let mut items: Vec<TestItem> = self
            .rows
            .lock()
            .values()
            .filter(|item| category.as_ref().is_none_or(|c| *c == item.category))
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.view_count, item.id));
        if desc {
            items.reverse();
        }
        if let Some((cursor_sort, cursor_id)) = cursor {
            items.retain(|item| {
                let key = (item.view_count, item.id);
                if desc {
                    key < (cursor_sort, cursor_id)
                } else {
                    key > (cursor_sort, cursor_id)
                }
            });
        }
        items.iter().skip(offset).take(limit).map(item_row).collect()
    }

    fn run_patch(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<DbRow>> {
        // UPDATE test_items SET "col" = $1[, ...] WHERE "id" = $n RETURNING *
        let assignments: Vec<&str> = sql
            .split(" SET ")
            .nth(1)
            .and_then(|rest| rest.split(" WHERE ").next())
            .map(|s| s.split(", ").collect())
            .unwrap_or_default();
        let id = param_i64(params.last().ok_or(DbError::NoRows)?);

        let mut rows = self.rows.lock();
        let Some(item) = rows.get_mut(&id) else {
            return Ok(Vec::new());
        };
        for (i, assignment) in assignments.iter().enumerate() {
            let column = assignment
                .split('"')
                .nth(1)
                .unwrap_or_default();
            match column {
                "name" => item.name = param_text(&params[i]),
                "value" => {
                    item.value = i32::try_from(param_i64(&params[i])).unwrap_or(0);
                }
                "category" => item.category = param_text(&params[i]),
                "view_count" => item.view_count = param_i64(&params[i]),
                _ => {}
            }
        }
        Ok(vec![item_row(item)])
    }
}

#[async_trait]
impl DbProvider for TestItemStore {
    async fn query(&self, sql: &str) -> Result<Vec<DbRow>> {
        self.query_dyn(sql, &[]).await
    }

    async fn query_params(&self, sql: &'static str, params: &[SqlParam]) -> Result<Vec<DbRow>> {
        self.query_dyn(sql, params).await
    }

    async fn execute(&self, sql: &'static str, params: &[SqlParam]) -> Result<u64> {
        self.execute_dyn(sql, params).await
    }

    async fn query_dyn(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<DbRow>> {
        if sql == TestItem::SELECT_BY_PK {
            self.select_calls.fetch_add(1, Ordering::Relaxed);
            let id = param_i64(&params[0]);
            return Ok(self.rows.lock().get(&id).map(item_row).into_iter().collect());
        }
        if sql == TestItem::INSERT_RETURNING {
            let item = TestItem {
                id: 0,
                name: param_text(&params[0]),
                value: i32::try_from(param_i64(&params[1])).unwrap_or(0),
                category: param_text(&params[2]),
                view_count: param_i64(&params[3]),
            };
            let id = self.insert_row(item);
            let rows = self.rows.lock();
            return Ok(vec![item_row(&rows[&id])]);
        }
        if sql.starts_with("SELECT * FROM test_items") {
            return Ok(self.run_list_query(sql, params));
        }
        if sql.starts_with("UPDATE test_items SET") && sql.ends_with("RETURNING *") {
            return self.run_patch(sql, params);
        }
        Err(DbError::Query {
            message: format!("test store cannot interpret: {sql}"),
            sql_state: None,
        }
        .into())
    }

    async fn execute_dyn(&self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        if sql == TestItem::UPDATE_BY_PK {
            let id = param_i64(&params[4]);
            let mut rows = self.rows.lock();
            let Some(item) = rows.get_mut(&id) else { return Ok(0) };
            item.name = param_text(&params[0]);
            item.value = i32::try_from(param_i64(&params[1])).unwrap_or(0);
            item.category = param_text(&params[2]);
            item.view_count = param_i64(&params[3]);
            return Ok(1);
        }
        if sql == TestItem::DELETE_BY_PK {
            let id = param_i64(&params[0]);
            return Ok(u64::from(self.rows.lock().remove(&id).is_some()));
        }
        Err(DbError::Query {
            message: format!("test store cannot execute: {sql}"),
            sql_state: None,
        }
        .into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use relais_core::list::{build_list_sql, build_query, Pagination};

    #[test]
    fn descriptor_predicates() {
        use relais_core::list::{compare_entities, group_key, ListDescriptor, SortSpec};

        let tech = TestItem::new("a", 1).in_category("tech", 10);
        let cooking = TestItem::new("b", 2).in_category("cooking", 20);

        // Filter-match predicate: empty record matches everything.
        assert!(TestItemsByCategory::matches(&tech, &TestItemFilters::default()));
        assert!(TestItemsByCategory::matches(&tech, &TestItemFilters::category("tech")));
        assert!(!TestItemsByCategory::matches(&tech, &TestItemFilters::category("cooking")));

        // Comparator follows the sort direction with pk tie-break.
        let desc = SortSpec::desc(0);
        assert_eq!(
            compare_entities::<TestItemsByCategory>(&cooking, &tech, desc),
            std::cmp::Ordering::Less,
            "higher view count sorts first under desc"
        );

        // Group keys are deterministic and filter-sensitive.
        let g1 = group_key::<TestItemsByCategory>(&TestItemFilters::category("tech"));
        let g2 = group_key::<TestItemsByCategory>(&TestItemFilters::category("tech"));
        let g3 = group_key::<TestItemsByCategory>(&TestItemFilters::category("cooking"));
        assert_eq!(g1, g2);
        assert_ne!(g1, g3);
        assert!(g1.starts_with("test_item:"));
    }

    #[test]
    fn serialization_roundtrips() {
        let item = TestItem::new("widget", 42).in_category("tech", 100);
        let json = item.to_json().unwrap();
        assert_eq!(TestItem::from_json(&json).unwrap(), item);

        let bin = item.to_binary().unwrap();
        assert_eq!(TestItem::from_binary(&bin).unwrap(), item);
    }

    #[tokio::test]
    async fn store_interprets_entity_templates() {
        let store = TestItemStore::new();
        let id = store.insert_row(TestItem::new("a", 1));

        let rows = store
            .query_params(TestItem::SELECT_BY_PK, &[id.into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(TestItem::from_row(&rows[0]).unwrap().name, "a");

        let affected = store
            .execute(TestItem::DELETE_BY_PK, &[id.into()])
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(store.row_count(), 0);
    }

    #[tokio::test]
    async fn store_interprets_generated_list_sql() {
        let store = TestItemStore::new();
        for vc in [10, 30, 20] {
            store.insert_row(TestItem::new("x", 0).in_category("tech", vc));
        }
        store.insert_row(TestItem::new("y", 0).in_category("cooking", 99));

        let query = build_query::<TestItemsByCategory>(
            TestItemFilters::category("tech"),
            None,
            5,
            Pagination::Offset(0),
        );
        let (sql, params) = build_list_sql::<TestItemsByCategory>(&query);
        let rows = store.query_dyn(&sql, &params).await.unwrap();
        let views: Vec<i64> = rows
            .iter()
            .map(|r| TestItem::from_row(r).unwrap().view_count)
            .collect();
        assert_eq!(views, vec![30, 20, 10]);
    }
}
