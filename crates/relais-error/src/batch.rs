//! I/O batcher errors.

/// Errors from the adaptive batch scheduler.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Batch scheduler is shut down")]
    Closed,

    #[error("Batched request was dropped before completion")]
    Dropped,

    #[error("No cache-server pool configured for this scheduler")]
    NoCachePool,
}

impl BatchError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Closed => "batch_closed",
            Self::Dropped => "batch_dropped",
            Self::NoCachePool => "batch_no_cache_pool",
        }
    }
}
