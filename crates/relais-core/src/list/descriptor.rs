//! Compile-time list descriptors.
//!
//! A list-enabled entity carries a descriptor declaring its filterable
//! columns, sort columns and pagination limits. From it the functions here
//! derive deterministic group and cache keys, the SQL for a page query,
//! and limit/sort normalization.

use std::hash::{Hash, Hasher};

use crate::db::SqlParam;
use crate::entity::EntityMapping;

use super::query::{Cursor, ListQuery, Pagination, SortSpec};

/// One sortable column: the public field name and the database column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortColumn {
    pub field: &'static str,
    pub column: &'static str,
}

/// A built WHERE fragment with its bound parameters.
#[derive(Debug, Clone, Default)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl WhereClause {
    /// Next `$n` placeholder index.
    pub fn next_param(&self) -> usize {
        self.params.len() + 1
    }

    /// Append one `"column" = $n` predicate.
    pub fn push_eq(&mut self, column: &str, value: SqlParam) {
        if !self.sql.is_empty() {
            self.sql.push_str(" AND ");
        }
        self.sql.push_str(&format!("\"{}\" = ${}", column, self.next_param()));
        self.params.push(value);
    }
}

/// Declarative description of an entity's list queries.
pub trait ListDescriptor: Send + Sync + 'static {
    type Entity: EntityMapping;
    /// Typed filter record: one optional value per filterable column.
    /// Doubles as the filter-tag type recorded in the modification log.
    type Filters: Clone + PartialEq + Hash + Default + Send + Sync + 'static;

    const SORT_COLUMNS: &'static [SortColumn];
    const DEFAULT_SORT: SortSpec;
    const DEFAULT_LIMIT: u16;
    const MAX_LIMIT: u16;
    /// Permitted page sizes; requests round up to the next step.
    const LIMIT_STEPS: &'static [u16];

    /// Extract the filter tags of an entity (which filter values it has).
    fn filter_tags(entity: &Self::Entity) -> Self::Filters;

    /// Does the entity satisfy the filter record?
    fn matches(entity: &Self::Entity, filters: &Self::Filters) -> bool;

    /// Extract the sort value for a sort-column index.
    fn sort_value(entity: &Self::Entity, field: usize) -> i64;

    /// Primary key as i64, for cursor construction.
    fn pk_value(entity: &Self::Entity) -> i64;

    /// Emit WHERE predicates for the filter record.
    fn build_where(filters: &Self::Filters) -> WhereClause;

    /// Filter records under which this entity appears in cached lists:
    /// typically the unfiltered record plus each combination of the
    /// entity's own filter values. Drives which L2 groups a write
    /// invalidates.
    fn visible_filter_records(entity: &Self::Entity) -> Vec<Self::Filters>;
}

/// Deterministic, order-independent hash of a filter record.
fn filter_hash<D: ListDescriptor>(filters: &D::Filters) -> u64 {
    // FNV-1a with a fixed seed: group keys are shared through Redis, so
    // the hash must agree across processes (no RandomState).
    struct Fnv(u64);
    impl Hasher for Fnv {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 ^= u64::from(b);
                self.0 = self.0.wrapping_mul(0x0100_0000_01b3);
            }
        }
    }
    let mut h = Fnv(0xcbf2_9ce4_8422_2325);
    filters.hash(&mut h);
    h.finish()
}

/// `group_key = name + ":" + hash(filters)`.
pub fn group_key<D: ListDescriptor>(filters: &D::Filters) -> String {
    format!("{}:{:016x}", D::Entity::NAME, filter_hash::<D>(filters))
}

/// `cache_key = group_key + sort + direction + pagination + limit`.
pub fn cache_key<D: ListDescriptor>(
    filters: &D::Filters,
    sort: SortSpec,
    pagination: &Pagination,
    limit: u16,
) -> String {
    let group = group_key::<D>(filters);
    let dir = if sort.direction.is_desc() { "d" } else { "a" };
    let page = match pagination {
        Pagination::Offset(off) => format!("o{off}"),
        Pagination::Cursor(c) => format!("c{}", c.encode()),
    };
    format!("{group}:{}:{dir}:{page}:{limit}", sort.field)
}

/// Round a requested limit up to the next permitted step, clamped to the
/// maximum.
pub fn normalize_limit<D: ListDescriptor>(requested: u16) -> u16 {
    if requested == 0 {
        return D::DEFAULT_LIMIT;
    }
    for &step in D::LIMIT_STEPS {
        if requested <= step {
            return step;
        }
    }
    D::MAX_LIMIT
}

/// Resolve a public sort-field name to its descriptor index.
pub fn parse_sort_field<D: ListDescriptor>(field: &str) -> Option<usize> {
    D::SORT_COLUMNS.iter().position(|c| c.field == field)
}

/// Assemble a fully resolved query with derived keys.
pub fn build_query<D: ListDescriptor>(
    filters: D::Filters,
    sort: Option<SortSpec>,
    limit: u16,
    pagination: Pagination,
) -> ListQuery<D::Filters> {
    let sort = sort.unwrap_or(D::DEFAULT_SORT);
    let limit = normalize_limit::<D>(limit);
    let group_key = group_key::<D>(&filters);
    let cache_key = cache_key::<D>(&filters, sort, &pagination, limit);
    ListQuery { filters, sort, limit, pagination, group_key, cache_key }
}

/// Build the page SELECT: WHERE + keyset cursor + ORDER BY + LIMIT/OFFSET.
///
/// Sort columns are wrapped in `COALESCE(col, 0)` so NULL sort values
/// order deterministically with the cursor comparison.
pub fn build_list_sql<D: ListDescriptor>(query: &ListQuery<D::Filters>) -> (String, Vec<SqlParam>) {
    let mut clause = D::build_where(&query.filters);
    let sort_col = D::SORT_COLUMNS[query.sort.field].column;
    let pk_col = D::Entity::PRIMARY_KEY_COLUMN;
    let desc = query.sort.direction.is_desc();

    if let Pagination::Cursor(cursor) = &query.pagination {
        let cmp = if desc { "<" } else { ">" };
        if !clause.sql.is_empty() {
            clause.sql.push_str(" AND ");
        }
        clause.sql.push_str(&format!(
            "(COALESCE(\"{sort_col}\", 0), \"{pk_col}\") {cmp} (${}, ${})",
            clause.next_param(),
            clause.next_param() + 1,
        ));
        clause.params.push(SqlParam::Int8(cursor.sort_value));
        clause.params.push(SqlParam::Int8(cursor.primary_key));
    }

    let mut sql = format!("SELECT * FROM {}", D::Entity::TABLE);
    if !clause.sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clause.sql);
    }
    let dir = query.sort.direction.sql();
    sql.push_str(&format!(
        " ORDER BY COALESCE(\"{sort_col}\", 0) {dir}, \"{pk_col}\" {dir} LIMIT {}",
        query.limit
    ));
    if let Pagination::Offset(offset) = query.pagination {
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    (sql, clause.params)
}

/// Extract the keyset cursor from the last item of a full page.
pub fn extract_cursor<D: ListDescriptor>(entity: &D::Entity, sort: SortSpec) -> Cursor {
    Cursor {
        sort_value: D::sort_value(entity, sort.field),
        primary_key: D::pk_value(entity),
    }
}

/// Order two entities the way their page query does: by the sort column,
/// primary key as tie-breaker, both reversed for descending sorts.
pub fn compare_entities<D: ListDescriptor>(
    a: &D::Entity,
    b: &D::Entity,
    sort: SortSpec,
) -> std::cmp::Ordering {
    let key_a = (D::sort_value(a, sort.field), D::pk_value(a));
    let key_b = (D::sort_value(b, sort.field), D::pk_value(b));
    if sort.direction.is_desc() {
        key_b.cmp(&key_a)
    } else {
        key_a.cmp(&key_b)
    }
}
