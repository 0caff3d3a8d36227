//! Provider-agnostic row values.
//!
//! The provider seam returns owned `DbRow` values rather than driver rows,
//! so entities deserialize the same way from PostgreSQL and from the mock
//! provider used in tests.

use relais_error::{DbError, RelaisError, Result};

/// One column value.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Bool(bool),
    Int8(i64),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Json(serde_json::Value),
}

/// One result row: column names plus values, positionally aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct DbRow {
    columns: Vec<String>,
    values: Vec<DbValue>,
}

impl DbRow {
    pub fn new(columns: Vec<String>, values: Vec<DbValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn index_of(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| missing(column))
    }

    pub fn value(&self, column: &str) -> Result<&DbValue> {
        let idx = self.index_of(column)?;
        Ok(&self.values[idx])
    }

    pub fn value_at(&self, idx: usize) -> Result<&DbValue> {
        self.values.get(idx).ok_or_else(|| missing("<index>"))
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.value(column)? {
            DbValue::Int8(v) => Ok(*v),
            other => Err(mismatch(column, "int8", other)),
        }
    }

    pub fn get_i32(&self, column: &str) -> Result<i32> {
        let v = self.get_i64(column)?;
        i32::try_from(v).map_err(|_| mismatch(column, "int4", &DbValue::Int8(v)))
    }

    pub fn get_f64(&self, column: &str) -> Result<f64> {
        match self.value(column)? {
            DbValue::Float8(v) => Ok(*v),
            DbValue::Int8(v) => Ok(*v as f64),
            other => Err(mismatch(column, "float8", other)),
        }
    }

    pub fn get_bool(&self, column: &str) -> Result<bool> {
        match self.value(column)? {
            DbValue::Bool(v) => Ok(*v),
            other => Err(mismatch(column, "bool", other)),
        }
    }

    pub fn get_text(&self, column: &str) -> Result<String> {
        match self.value(column)? {
            DbValue::Text(v) => Ok(v.clone()),
            other => Err(mismatch(column, "text", other)),
        }
    }

    pub fn get_opt_text(&self, column: &str) -> Result<Option<String>> {
        match self.value(column)? {
            DbValue::Null => Ok(None),
            DbValue::Text(v) => Ok(Some(v.clone())),
            other => Err(mismatch(column, "text", other)),
        }
    }

    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>> {
        match self.value(column)? {
            DbValue::Null => Ok(None),
            DbValue::Int8(v) => Ok(Some(*v)),
            other => Err(mismatch(column, "int8", other)),
        }
    }

    pub fn is_null(&self, column: &str) -> Result<bool> {
        Ok(matches!(self.value(column)?, DbValue::Null))
    }
}

fn missing(column: &str) -> RelaisError {
    DbError::Decode { message: format!("column not found: {column}") }.into()
}

fn mismatch(column: &str, expected: &str, got: &DbValue) -> RelaisError {
    DbError::Decode {
        message: format!("column {column}: expected {expected}, got {got:?}"),
    }
    .into()
}
