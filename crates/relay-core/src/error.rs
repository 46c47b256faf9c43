//! Error types for message modelling and batch translation.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while decoding messages or building outbound batches.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Message body is not valid JSON for the expected shape.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A field parsed structurally but holds an unusable value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Outbound batch could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::Serialization(err.to_string())
        } else {
            Self::Malformed(err.to_string())
        }
    }
}
