//! Network-cache (L2) errors. Caught and logged at the L2 layer; reads fall
//! through to L3 and writes are swallowed.

/// Errors from the Redis provider.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection error: {message}")]
    Connection { message: String },

    #[error("Cache script error: {message}")]
    Script { message: String },

    #[error("Cache protocol error: {message}")]
    Protocol { message: String },

    #[error("Unexpected cache reply: expected {expected}, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got:      &'static str,
    },
}

impl CacheError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "cache_connection",
            Self::Script { .. } => "cache_script",
            Self::Protocol { .. } => "cache_protocol",
            Self::UnexpectedReply { .. } => "cache_unexpected_reply",
        }
    }
}
