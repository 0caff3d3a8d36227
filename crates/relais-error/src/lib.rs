//! Unified error types for the relais crates.
//!
//! Each tier has its own domain error; `RelaisError` wraps them all so the
//! repository surface exposes a single error type. The cache tiers (L1/L2)
//! never surface their own faults to callers: those are logged and
//! swallowed at the tier boundary, so in practice callers observe
//! `Db` errors and serialization errors only.

// Error variants and fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

mod batch;
mod cache;
mod db;
mod list;
mod serialize;

pub use batch::BatchError;
pub use cache::CacheError;
pub use db::DbError;
pub use list::ListError;
pub use serialize::SerializeError;

/// Convenience alias used across all relais crates.
pub type Result<T> = std::result::Result<T, RelaisError>;

/// Unified error type wrapping all domain errors.
#[derive(Debug, thiserror::Error)]
pub enum RelaisError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    List(#[from] ListError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source:  Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RelaisError {
    /// Stable machine-readable code for this error.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Db(e) => e.error_code(),
            Self::Cache(e) => e.error_code(),
            Self::Serialize(e) => e.error_code(),
            Self::List(e) => e.error_code(),
            Self::Batch(e) => e.error_code(),
            Self::Internal { .. } => "internal_error",
        }
    }

    /// True when the fault came from a cache tier and the operation can
    /// fall through to the next tier.
    pub const fn is_cache_fault(&self) -> bool {
        matches!(self, Self::Cache(_) | Self::Serialize(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = RelaisError::from(DbError::Pool {
            message: "exhausted".to_string(),
        });
        assert_eq!(err.error_code(), "db_pool");

        let err = RelaisError::from(CacheError::Connection {
            message: "refused".to_string(),
        });
        assert_eq!(err.error_code(), "cache_connection");
    }

    #[test]
    fn cache_faults_are_recoverable() {
        let cache = RelaisError::from(CacheError::Script {
            message: "bad lua".to_string(),
        });
        assert!(cache.is_cache_fault());

        let db = RelaisError::from(DbError::Query {
            message:   "syntax".to_string(),
            sql_state: Some("42601".to_string()),
        });
        assert!(!db.is_cache_fault());
    }
}
