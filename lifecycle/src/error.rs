//! Error types for the tool lifecycle.

use thiserror::Error;

use toolforge_registry::ValidationResult;

use crate::lifecycle::LifecyclePhase;

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Terminal outcomes of a lifecycle run that is not a promotion.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The generation model never produced parseable output for a phase
    /// within the retry budget.
    #[error("generation failed in {phase} after {attempts} attempts: {detail}")]
    Generation {
        phase: LifecyclePhase,
        attempts: u32,
        detail: String,
    },

    /// Validation ran and the verdict was fail. Carries the full result so
    /// callers can inspect the diagnostics without re-running.
    #[error("validation failed with {} diagnostic(s)", .0.diagnostics.len())]
    Validation(Box<ValidationResult>),

    /// The spec requests a capability outside the allow-list. Rejected even
    /// when validation passed.
    #[error("policy violation: capability '{capability}' is not allowed")]
    Policy { capability: String },

    /// A declared dependency does not resolve to a registry entry.
    #[error("dangling dependency: '{tool_id}' is not in the registry")]
    Dependency { tool_id: String },

    /// The caller cancelled the run.
    #[error("lifecycle cancelled")]
    Cancelled,

    /// Sandbox infrastructure failure (not a validation verdict).
    #[error("sandbox error: {0}")]
    Sandbox(#[from] toolforge_sandbox::SandboxError),

    /// Registry failure during promotion.
    #[error("registry error: {0}")]
    Registry(#[from] toolforge_registry::RegistryError),

    /// Embedding collaborator failure during promotion.
    #[error("embedding error: {0}")]
    Embedding(#[from] toolforge_embeddings::EmbeddingError),

    /// IO failure writing pre-promotion artifacts.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
