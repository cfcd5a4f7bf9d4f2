//! Error types for the embeddings crate.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors from embedding generation or comparison.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Two vectors of different dimensions were compared.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding API call failed.
    #[error("embedding api request failed: {0}")]
    ApiRequest(String),

    /// The API responded with something other than an embedding.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    /// HTTP transport error.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
