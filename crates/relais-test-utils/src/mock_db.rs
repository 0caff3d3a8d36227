//! Scripted database mock: register a handler per SQL template, count
//! calls, fail on anything unexpected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use relais_core::db::{DbProvider, DbRow, SqlParam};
use relais_error::{DbError, Result};

type QueryHandler = Box<dyn Fn(&[SqlParam]) -> Result<Vec<DbRow>> + Send + Sync>;
type ExecuteHandler = Box<dyn Fn(&[SqlParam]) -> Result<u64> + Send + Sync>;

/// Scripted `DbProvider`. Handlers are matched by exact SQL text.
#[derive(Default)]
pub struct MockDb {
    query_handlers: Mutex<HashMap<String, QueryHandler>>,
    execute_handlers: Mutex<HashMap<String, ExecuteHandler>>,
    calls: Mutex<HashMap<String, u64>>,
    pipeline_count: AtomicU64,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a row-returning handler for a statement.
    pub fn on_query(
        &self,
        sql: impl Into<String>,
        handler: impl Fn(&[SqlParam]) -> Result<Vec<DbRow>> + Send + Sync + 'static,
    ) {
        self.query_handlers.lock().insert(sql.into(), Box::new(handler));
    }

    /// Register an affected-count handler for a statement.
    pub fn on_execute(
        &self,
        sql: impl Into<String>,
        handler: impl Fn(&[SqlParam]) -> Result<u64> + Send + Sync + 'static,
    ) {
        self.execute_handlers.lock().insert(sql.into(), Box::new(handler));
    }

    /// How many times a statement ran.
    pub fn calls(&self, sql: &str) -> u64 {
        self.calls.lock().get(sql).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.lock().values().sum()
    }

    pub fn pipeline_count(&self) -> u64 {
        self.pipeline_count.load(Ordering::Relaxed)
    }

    fn record(&self, sql: &str) {
        *self.calls.lock().entry(sql.to_string()).or_insert(0) += 1;
    }

    fn run_query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<DbRow>> {
        self.record(sql);
        let handlers = self.query_handlers.lock();
        match handlers.get(sql) {
            Some(handler) => handler(params),
            None => Err(DbError::Query {
                message: format!("no mock handler for: {sql}"),
                sql_state: None,
            }
            .into()),
        }
    }

    fn run_execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        self.record(sql);
        let handlers = self.execute_handlers.lock();
        match handlers.get(sql) {
            Some(handler) => handler(params),
            None => Err(DbError::Query {
                message: format!("no mock execute handler for: {sql}"),
                sql_state: None,
            }
            .into()),
        }
    }
}

#[async_trait]
impl DbProvider for MockDb {
    async fn query(&self, sql: &str) -> Result<Vec<DbRow>> {
        self.run_query(sql, &[])
    }

    async fn query_params(&self, sql: &'static str, params: &[SqlParam]) -> Result<Vec<DbRow>> {
        self.run_query(sql, params)
    }

    async fn execute(&self, sql: &'static str, params: &[SqlParam]) -> Result<u64> {
        self.run_execute(sql, params)
    }

    async fn query_dyn(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<DbRow>> {
        self.run_query(sql, params)
    }

    async fn execute_dyn(&self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        self.run_execute(sql, params)
    }

    async fn pipeline(
        &self,
        statements: Vec<(&'static str, Vec<SqlParam>)>,
    ) -> Result<Vec<Vec<DbRow>>> {
        self.pipeline_count.fetch_add(1, Ordering::Relaxed);
        statements
            .into_iter()
            .map(|(sql, params)| self.run_query(sql, &params))
            .collect()
    }

    async fn pipeline_execute(
        &self,
        statements: Vec<(&'static str, Vec<SqlParam>)>,
    ) -> Result<Vec<u64>> {
        self.pipeline_count.fetch_add(1, Ordering::Relaxed);
        statements
            .into_iter()
            .map(|(sql, params)| self.run_execute(sql, &params))
            .collect()
    }
}
