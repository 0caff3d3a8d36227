//! Startup validation for partial-key repositories.
//!
//! A partial key (a subset of a composite primary key) is only safe when
//! the key column is globally unique (SEQUENCE or UUID default) and every
//! missing primary-key component is a partition column of the table.
//! Call this at application startup to catch configuration errors early.

use relais_error::Result;

use super::provider::DbProvider;
use super::params::SqlParam;

/// Outcome of a partial-key safety check.
#[derive(Debug, Clone)]
pub struct PartialKeyReport {
    pub valid: bool,
    pub reason: String,
}

/// Catalog query: the key column's default expression (sequence check).
pub const SEQUENCE_DEFAULT_SQL: &str = r"
    SELECT pg_get_expr(d.adbin, d.adrelid) AS default_expr
    FROM pg_attribute a
    JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    JOIN pg_class c ON c.oid = a.attrelid
    WHERE c.relname = $1 AND a.attname = $2
";

/// Catalog query: the key column's type name (UUID check).
pub const COLUMN_TYPE_SQL: &str = r"
    SELECT t.typname
    FROM pg_attribute a
    JOIN pg_type t ON t.oid = a.atttypid
    JOIN pg_class c ON c.oid = a.attrelid
    WHERE c.relname = $1 AND a.attname = $2
";

/// Catalog query: the table's partition columns.
pub const PARTITION_COLUMNS_SQL: &str = r"
    SELECT a.attname
    FROM pg_partitioned_table p
    JOIN pg_class c ON c.oid = p.partrelid
    JOIN pg_attribute a ON a.attrelid = c.oid
        AND a.attnum = ANY(p.partattrs::int2[])
    WHERE c.relname = $1
";

/// Validate that `key_column` identifies rows of `table` on its own and
/// that `missing_columns` are all partition columns.
///
/// # Errors
///
/// Returns `DbError` when the catalog queries themselves fail; a negative
/// validation outcome is reported through [`PartialKeyReport::valid`].
pub async fn validate_partial_key(
    db: &dyn DbProvider,
    table: &str,
    key_column: &str,
    missing_columns: &[&str],
) -> Result<PartialKeyReport> {
    let params = [SqlParam::from(table), SqlParam::from(key_column)];

    let mut unique = false;
    let mut reason = String::new();

    let rows = db.query_params(SEQUENCE_DEFAULT_SQL, &params).await?;
    if let Some(row) = rows.first() {
        if let Some(expr) = row.get_opt_text("default_expr")? {
            if expr.contains("nextval(") {
                unique = true;
                reason = "key column uses a SEQUENCE default".to_string();
            }
        }
    }

    if !unique {
        let rows = db.query_params(COLUMN_TYPE_SQL, &params).await?;
        if let Some(row) = rows.first() {
            if row.get_text("typname")? == "uuid" {
                unique = true;
                reason = "key column is UUID-typed".to_string();
            }
        }
    }

    if !unique {
        return Ok(PartialKeyReport {
            valid: false,
            reason: format!("{table}.{key_column} is neither SEQUENCE-backed nor UUID"),
        });
    }

    let rows = db
        .query_params(PARTITION_COLUMNS_SQL, &[SqlParam::from(table)])
        .await?;
    let partition_cols: Vec<String> = rows
        .iter()
        .map(|r| r.get_text("attname"))
        .collect::<Result<_>>()?;

    for missing in missing_columns {
        if !partition_cols.iter().any(|c| c == missing) {
            return Ok(PartialKeyReport {
                valid: false,
                reason: format!("{table}.{missing} is not a partition column"),
            });
        }
    }

    Ok(PartialKeyReport { valid: true, reason })
}
