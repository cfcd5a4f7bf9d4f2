//! Error types for workflow definition and execution.

use thiserror::Error;

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that abort a workflow load or run.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// The definition is structurally invalid (rejected at load time).
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// Two steps share an id, or a step id was written twice.
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),

    /// A `$` reference names a step or variable not present in context.
    #[error("unresolved reference: {name}")]
    UnresolvedReference { name: String },

    /// A `foreach` source did not resolve to a sequence.
    #[error("step '{step_id}': foreach source '{reference}' is not a sequence")]
    NotASequence { step_id: String, reference: String },

    /// A step references a tool the registry cannot resolve.
    #[error("step '{step_id}': unknown tool '{tool}'")]
    UnknownTool { step_id: String, tool: String },

    /// A step's sandboxed invocation failed; the whole run is aborted.
    #[error("step '{step_id}' failed: {cause}")]
    StepFailed { step_id: String, cause: String },

    /// The caller cancelled the run.
    #[error("workflow cancelled")]
    Cancelled,

    /// Registry failure while resolving tools.
    #[error("registry error: {0}")]
    Registry(#[from] toolforge_registry::RegistryError),

    /// Sandbox infrastructure failure (not a tool failure).
    #[error("sandbox error: {0}")]
    Sandbox(#[from] toolforge_sandbox::SandboxError),

    /// A definition failed to parse.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
