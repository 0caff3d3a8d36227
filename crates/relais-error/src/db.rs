//! Relational-tier (L3) errors. These propagate to repository callers.

/// Errors from the PostgreSQL provider.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Connection pool error: {message}")]
    Pool { message: String },

    #[error("Query failed: {message}")]
    Query {
        message:   String,
        /// PostgreSQL SQLSTATE code when available (e.g. "23505").
        sql_state: Option<String>,
    },

    #[error("Row decode failed: {message}")]
    Decode { message: String },

    #[error("Statement returned no rows where one was required")]
    NoRows,
}

impl DbError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Pool { .. } => "db_pool",
            Self::Query { .. } => "db_query",
            Self::Decode { .. } => "db_decode",
            Self::NoRows => "db_no_rows",
        }
    }

    /// True for constraint violations (SQLSTATE class 23).
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Query {
                sql_state: Some(state),
                ..
            } => state.starts_with("23"),
            _ => false,
        }
    }
}
