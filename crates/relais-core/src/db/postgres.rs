//! PostgreSQL provider over `deadpool-postgres`.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use futures::future::try_join_all;
use relais_error::{DbError, RelaisError, Result};
use tokio_postgres::types::Type;
use tokio_postgres::{NoTls, Row};

use super::params::{borrow_params, SqlParam};
use super::provider::DbProvider;
use super::row::{DbRow, DbValue};

/// Pooled PostgreSQL provider.
///
/// Uses `deadpool-postgres` for connection pooling and `tokio-postgres`
/// for async queries. Statement pipelining relies on tokio-postgres's
/// native behavior: queries issued concurrently on one client are
/// pipelined on the wire.
pub struct PostgresProvider {
    pool: Pool,
}

impl PostgresProvider {
    /// Create a provider with the default pool size.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Pool` if pool creation or the connectivity probe
    /// fails.
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_pool_size(connection_string, 10).await
    }

    /// Create a provider with a custom pool size.
    pub async fn with_pool_size(connection_string: &str, max_size: usize) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(connection_string.to_string());
        cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(max_size));

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            DbError::Pool { message: format!("failed to create connection pool: {e}") }
        })?;

        let client = pool.get().await.map_err(pool_error)?;
        client.query("SELECT 1", &[]).await.map_err(query_error)?;

        Ok(Self { pool })
    }

    /// Health check - verifies connectivity with `SELECT 1`.
    pub async fn health_check(&self) -> Result<()> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client.query("SELECT 1", &[]).await.map_err(query_error)?;
        Ok(())
    }
}

#[async_trait]
impl DbProvider for PostgresProvider {
    async fn query(&self, sql: &str) -> Result<Vec<DbRow>> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client.query(sql, &[]).await.map_err(query_error)?;
        rows.iter().map(convert_row).collect()
    }

    async fn query_params(&self, sql: &'static str, params: &[SqlParam]) -> Result<Vec<DbRow>> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let stmt = client.prepare_cached(sql).await.map_err(query_error)?;
        let rows = client.query(&stmt, &borrow_params(params)).await.map_err(query_error)?;
        rows.iter().map(convert_row).collect()
    }

    async fn execute(&self, sql: &'static str, params: &[SqlParam]) -> Result<u64> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let stmt = client.prepare_cached(sql).await.map_err(query_error)?;
        client.execute(&stmt, &borrow_params(params)).await.map_err(query_error)
    }

    async fn query_dyn(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<DbRow>> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client.query(sql, &borrow_params(params)).await.map_err(query_error)?;
        rows.iter().map(convert_row).collect()
    }

    async fn execute_dyn(&self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client.execute(sql, &borrow_params(params)).await.map_err(query_error)
    }

    async fn pipeline(
        &self,
        statements: Vec<(&'static str, Vec<SqlParam>)>,
    ) -> Result<Vec<Vec<DbRow>>> {
        let client = self.pool.get().await.map_err(pool_error)?;

        // Prepare sequentially (cached after first use), then poll all
        // query futures concurrently so the driver pipelines them.
        let mut prepared = Vec::with_capacity(statements.len());
        for (sql, params) in &statements {
            let stmt = client.prepare_cached(sql).await.map_err(query_error)?;
            prepared.push((stmt, borrow_params(params)));
        }

        let futures = prepared
            .iter()
            .map(|(stmt, params)| client.query(stmt, params));
        let all_rows = try_join_all(futures).await.map_err(query_error)?;

        all_rows
            .into_iter()
            .map(|rows| rows.iter().map(convert_row).collect())
            .collect()
    }

    async fn pipeline_execute(
        &self,
        statements: Vec<(&'static str, Vec<SqlParam>)>,
    ) -> Result<Vec<u64>> {
        let client = self.pool.get().await.map_err(pool_error)?;

        let mut prepared = Vec::with_capacity(statements.len());
        for (sql, params) in &statements {
            let stmt = client.prepare_cached(sql).await.map_err(query_error)?;
            prepared.push((stmt, borrow_params(params)));
        }

        let futures = prepared
            .iter()
            .map(|(stmt, params)| client.execute(stmt, params));
        try_join_all(futures).await.map_err(query_error)
    }
}

fn pool_error(e: deadpool_postgres::PoolError) -> RelaisError {
    DbError::Pool { message: format!("failed to acquire connection: {e}") }.into()
}

fn query_error(e: tokio_postgres::Error) -> RelaisError {
    DbError::Query {
        message: format!("query execution failed: {e}"),
        sql_state: e.code().map(|c| c.code().to_string()),
    }
    .into()
}

/// Convert a driver row into the provider-agnostic representation.
fn convert_row(row: &Row) -> Result<DbRow> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (idx, col) in row.columns().iter().enumerate() {
        columns.push(col.name().to_string());
        values.push(convert_value(row, idx, col.type_())?);
    }

    Ok(DbRow::new(columns, values))
}

fn convert_value(row: &Row, idx: usize, ty: &Type) -> Result<DbValue> {
    // `Type` constants are not usable in pattern position; compare.
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)
            .map(|v| v.map_or(DbValue::Null, DbValue::Bool))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)
            .map(|v| v.map_or(DbValue::Null, |v| DbValue::Int8(i64::from(v))))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)
            .map(|v| v.map_or(DbValue::Null, |v| DbValue::Int8(i64::from(v))))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)
            .map(|v| v.map_or(DbValue::Null, DbValue::Int8))
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)
            .map(|v| v.map_or(DbValue::Null, |v| DbValue::Float8(f64::from(v))))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)
            .map(|v| v.map_or(DbValue::Null, DbValue::Float8))
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)
            .map(|v| v.map_or(DbValue::Null, DbValue::Bytea))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)
            .map(|v| v.map_or(DbValue::Null, DbValue::Json))
    } else {
        row.try_get::<_, Option<String>>(idx)
            .map(|v| v.map_or(DbValue::Null, DbValue::Text))
    };

    value.map_err(|e| {
        DbError::Decode { message: format!("column {idx} ({ty}): {e}") }.into()
    })
}
