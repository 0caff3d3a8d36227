//! Relational tier (L3): provider trait, typed parameters, and the
//! PostgreSQL implementation over `deadpool-postgres`.

mod params;
mod postgres;
mod provider;
mod row;
mod validate;

pub use params::{FieldUpdate, SqlParam};
pub use postgres::PostgresProvider;
pub use provider::DbProvider;
pub use row::{DbRow, DbValue};
pub use validate::{
    validate_partial_key, PartialKeyReport, COLUMN_TYPE_SQL, PARTITION_COLUMNS_SQL,
    SEQUENCE_DEFAULT_SQL,
};
