//! Database provider seam.

use async_trait::async_trait;
use relais_error::Result;

use super::params::SqlParam;
use super::row::DbRow;

/// Async database primitives the repository tiers consume.
///
/// Statements are identified by `&'static str` SQL text; implementations
/// may key prepared-statement caches on the text's pointer identity, which
/// is stable for the generated per-entity templates.
///
/// `pipeline` executes a group of prepared statements on one connection,
/// letting the driver pipeline them; results come back in submission order.
#[async_trait]
pub trait DbProvider: Send + Sync {
    /// Execute an unparameterized statement and return all rows.
    async fn query(&self, sql: &str) -> Result<Vec<DbRow>>;

    /// Execute a prepared parameterized statement and return all rows.
    async fn query_params(&self, sql: &'static str, params: &[SqlParam]) -> Result<Vec<DbRow>>;

    /// Execute a statement and return the number of affected rows.
    async fn execute(&self, sql: &'static str, params: &[SqlParam]) -> Result<u64>;

    /// Parameterized query over dynamically built SQL (list queries,
    /// partial updates). Not a prepared-statement-cache candidate.
    async fn query_dyn(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<DbRow>>;

    /// Dynamically built statement returning the affected-row count.
    async fn execute_dyn(&self, sql: &str, params: &[SqlParam]) -> Result<u64>;

    /// Execute a group of prepared statements pipelined on one connection.
    ///
    /// Default implementation runs them sequentially; pooled providers
    /// override it with true pipelining.
    async fn pipeline(
        &self,
        statements: Vec<(&'static str, Vec<SqlParam>)>,
    ) -> Result<Vec<Vec<DbRow>>> {
        let mut results = Vec::with_capacity(statements.len());
        for (sql, params) in statements {
            results.push(self.query_params(sql, &params).await?);
        }
        Ok(results)
    }

    /// Pipelined variant returning affected-row counts, for write batches.
    async fn pipeline_execute(
        &self,
        statements: Vec<(&'static str, Vec<SqlParam>)>,
    ) -> Result<Vec<u64>> {
        let mut results = Vec::with_capacity(statements.len());
        for (sql, params) in statements {
            results.push(self.execute(sql, &params).await?);
        }
        Ok(results)
    }
}
