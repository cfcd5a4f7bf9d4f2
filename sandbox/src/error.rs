//! Error types for the sandbox.

use thiserror::Error;

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while setting up or driving a sandboxed process.
///
/// Note that a child process failing or blowing through a resource ceiling is
/// *not* an error at this level — those are reported through
/// [`crate::ExecutionOutcome`]. Errors here mean the sandbox itself could not
/// do its job.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The kernel refused the requested isolation (e.g. user namespaces are
    /// disabled) and the runner is configured to fail closed.
    #[error("isolation unavailable: {0}")]
    IsolationUnavailable(String),

    /// The artifact path or entry point cannot be used to build an
    /// invocation.
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    /// A completed execution did not produce a parseable result value.
    #[error("unparseable tool output: {0}")]
    UnparseableOutput(String),

    /// The caller cancelled the execution; the child has been terminated.
    #[error("execution cancelled")]
    Cancelled,

    /// Failed to create or clean up a scratch directory.
    #[error("scratch directory error: {0}")]
    Scratch(String),

    /// IO error spawning or communicating with the child.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
