//! Entity serialization errors. A malformed payload read from L2 is treated
//! as a cache miss; the entry is deleted and the read falls through to L3.

/// Errors converting entities to/from their wire formats.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("JSON serialization failed: {message}")]
    Json { message: String },

    #[error("Binary serialization failed: {message}")]
    Binary { message: String },

    #[error("Entity does not support binary serialization")]
    BinaryUnsupported,
}

impl SerializeError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Json { .. } => "serialize_json",
            Self::Binary { .. } => "serialize_binary",
            Self::BinaryUnsupported => "serialize_binary_unsupported",
        }
    }
}
