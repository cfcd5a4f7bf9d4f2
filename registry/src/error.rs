//! Error types for the registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur in the registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No entry for the given tool id.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The entry violates a store invariant and was refused.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    /// An on-disk entry could not be read back.
    #[error("corrupt entry at {path}: {detail}")]
    Corrupt { path: String, detail: String },

    /// Embedding collaborator failure during search.
    #[error("embedding error: {0}")]
    Embedding(#[from] toolforge_embeddings::EmbeddingError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
