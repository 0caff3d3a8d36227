//! Declarative list cache: pagination-aware caching of query result pages
//! keyed by filters + sort + pagination, invalidated precisely from
//! individual entity writes using sort-order bounds.

mod bounds;
mod cache;
mod descriptor;
mod query;
mod tracker;

pub use bounds::{ListBoundsHeader, SortBounds, LIST_BOUNDS_HEADER_SIZE, LIST_BOUNDS_MAGIC};
pub use cache::{ListCache, ListPage};
pub use descriptor::{
    build_list_sql, build_query, cache_key, compare_entities, extract_cursor, group_key,
    normalize_limit, parse_sort_field, ListDescriptor, SortColumn, WhereClause,
};
pub use query::{Cursor, ListQuery, Pagination, SortDirection, SortSpec};
pub use tracker::{EventKind, ModEvent, ModificationTracker};
