//! Entity and mapping traits consumed by the repository tiers.
//!
//! An entity is an opaque value identified by a primary key. The cache
//! never interprets entity fields except through the list descriptor's
//! accessors; everything else goes through the traits here.

use std::hash::Hash;
use std::sync::Arc;

use relais_error::{Result, SerializeError};

use crate::db::{DbRow, FieldUpdate, SqlParam};

/// A primary key: a scalar, a tuple of scalars, or a partial key.
///
/// `cache_key_part` renders the key for L2 key construction
/// (`{name}:{key}`, colon-joined for composite keys) and `to_params`
/// produces the bound parameters for the generated `WHERE pk = ...`
/// templates.
pub trait EntityKey: Clone + Eq + Hash + Send + Sync + 'static {
    fn cache_key_part(&self) -> String;
    fn to_params(&self) -> Vec<SqlParam>;
}

impl EntityKey for i64 {
    fn cache_key_part(&self) -> String {
        self.to_string()
    }

    fn to_params(&self) -> Vec<SqlParam> {
        vec![SqlParam::Int8(*self)]
    }
}

impl EntityKey for i32 {
    fn cache_key_part(&self) -> String {
        self.to_string()
    }

    fn to_params(&self) -> Vec<SqlParam> {
        vec![SqlParam::Int4(*self)]
    }
}

impl EntityKey for String {
    fn cache_key_part(&self) -> String {
        self.clone()
    }

    fn to_params(&self) -> Vec<SqlParam> {
        vec![SqlParam::Text(self.clone())]
    }
}

impl<A: EntityKey, B: EntityKey> EntityKey for (A, B) {
    fn cache_key_part(&self) -> String {
        format!("{}:{}", self.0.cache_key_part(), self.1.cache_key_part())
    }

    fn to_params(&self) -> Vec<SqlParam> {
        let mut params = self.0.to_params();
        params.extend(self.1.to_params());
        params
    }
}

impl<A: EntityKey, B: EntityKey, C: EntityKey> EntityKey for (A, B, C) {
    fn cache_key_part(&self) -> String {
        format!(
            "{}:{}:{}",
            self.0.cache_key_part(),
            self.1.cache_key_part(),
            self.2.cache_key_part()
        )
    }

    fn to_params(&self) -> Vec<SqlParam> {
        let mut params = self.0.to_params();
        params.extend(self.1.to_params());
        params.extend(self.2.to_params());
        params
    }
}

/// Cacheable entity: key extraction, row construction, serializers, and a
/// memory estimate used by GDSF eviction.
///
/// Binary serialization is optional; entities that support it set
/// `SUPPORTS_BINARY` and override the binary methods. The L2 tier falls
/// back to JSON when an entity lacks binary support.
pub trait Entity: Clone + Send + Sync + 'static {
    type Key: EntityKey;

    /// Whether `to_binary` / `from_binary` are implemented.
    const SUPPORTS_BINARY: bool = false;

    fn key(&self) -> Self::Key;

    /// Fallible constructor from a database row.
    fn from_row(row: &DbRow) -> Result<Self>;

    fn to_json(&self) -> Result<String>;

    fn from_json(json: &str) -> Result<Self>;

    fn to_binary(&self) -> Result<Vec<u8>> {
        Err(SerializeError::BinaryUnsupported.into())
    }

    #[allow(unused_variables)]
    fn from_binary(data: &[u8]) -> Result<Self> {
        Err(SerializeError::BinaryUnsupported.into())
    }

    /// Estimated bytes held alive by this entity, fixed at insertion time.
    fn memory_usage(&self) -> usize;
}

/// Generated SQL templates and parameter extraction for one entity table.
///
/// The SQL strings are `&'static str` so prepared-statement caches and the
/// batch scheduler can key on pointer identity.
pub trait EntityMapping: Entity {
    /// Repository name; prefixes every L2 key.
    const NAME: &'static str;
    const TABLE: &'static str;
    const PRIMARY_KEY_COLUMN: &'static str;

    const SELECT_BY_PK: &'static str;
    const INSERT_RETURNING: &'static str;
    const UPDATE_BY_PK: &'static str;
    const DELETE_BY_PK: &'static str;

    /// Delete template with partition-column predicates appended, used when
    /// a cached entity provides a partition hint. `None` for entities whose
    /// key is complete.
    const DELETE_BY_PK_WITH_HINT: Option<&'static str> = None;

    /// Parameters for `INSERT_RETURNING`, in template order.
    fn insert_params(&self) -> Vec<SqlParam>;

    /// Parameters for `UPDATE_BY_PK`: assignments first, key last.
    fn update_params(&self) -> Vec<SqlParam>;

    /// Partition-column values for `DELETE_BY_PK_WITH_HINT`, extracted from
    /// a cached entity. Empty when no hint template exists.
    fn partition_hint_params(&self) -> Vec<SqlParam> {
        Vec::new()
    }

    /// Build a dynamic partial-update statement.
    ///
    /// Returns the SQL text and bound parameters (`SET` values first, key
    /// parameters last). Dynamic SQL here is deliberate: patches touch
    /// arbitrary column subsets and are not statement-cache candidates.
    fn build_patch_sql(key: &Self::Key, updates: &[FieldUpdate]) -> (String, Vec<SqlParam>) {
        let mut sql = format!("UPDATE {} SET ", Self::TABLE);
        let mut params = Vec::with_capacity(updates.len() + 2);
        for (i, update) in updates.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("\"{}\" = ${}", update.column, i + 1));
            params.push(update.value.clone());
        }
        let key_params = key.to_params();
        sql.push_str(&format!(" WHERE \"{}\"", Self::PRIMARY_KEY_COLUMN));
        if key_params.len() == 1 {
            sql.push_str(&format!(" = ${}", params.len() + 1));
        } else {
            // Composite keys compare against a row value.
            sql.push_str(" = (");
            for i in 0..key_params.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&format!("${}", params.len() + i + 1));
            }
            sql.push(')');
        }
        params.extend(key_params);
        (sql, params)
    }

    /// L2 cache key for one entity: `{name}:{key}`.
    fn l2_key(key: &Self::Key) -> String {
        format!("{}:{}", Self::NAME, key.cache_key_part())
    }
}

/// Shared immutable entity handle returned by all read paths.
pub type EntityRef<E> = Arc<E>;
