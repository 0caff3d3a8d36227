//! Typed heterogeneous SQL parameters with null support.

use tokio_postgres::types::ToSql;

/// One bound SQL parameter.
///
/// Parameters are owned values so statements can be queued (and coalesced)
/// by the batch scheduler after the caller's borrow has ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Json(serde_json::Value),
}

impl SqlParam {
    /// Borrow as a `tokio-postgres` bindable value.
    pub fn as_dyn(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Null => &Option::<i64>::None,
            Self::Bool(v) => v,
            Self::Int2(v) => v,
            Self::Int4(v) => v,
            Self::Int8(v) => v,
            Self::Float8(v) => v,
            Self::Text(v) => v,
            Self::Bytea(v) => v,
            Self::Json(v) => v,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int8(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int4(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Borrow a parameter slice as the `&[&(dyn ToSql + Sync)]` shape the
/// driver expects.
pub(crate) fn borrow_params(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(SqlParam::as_dyn).collect()
}

/// One column assignment in a partial update.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub column: &'static str,
    pub value: SqlParam,
}

impl FieldUpdate {
    pub fn new(column: &'static str, value: impl Into<SqlParam>) -> Self {
        Self { column, value: value.into() }
    }
}
