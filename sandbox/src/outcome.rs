//! Structured results of sandboxed executions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};

/// Which resource ceiling was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Address-space limit.
    Memory,
    /// CPU-time limit (or the derived wall-clock deadline).
    Cpu,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// What happened inside the sandbox.
///
/// A resource breach is reported as [`ExecutionOutcome::ResourceExceeded`]
/// with the offending kind, never folded into a generic failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The child exited zero.
    Completed { stdout: String, stderr: String },

    /// The child exited non-zero for a reason other than a resource ceiling.
    ExecutionFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The child breached a resource ceiling and was terminated.
    ResourceExceeded {
        kind: ResourceKind,
        stdout: String,
        stderr: String,
    },
}

impl ExecutionOutcome {
    /// Whether the execution completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Captured standard output, whatever the outcome.
    pub fn stdout(&self) -> &str {
        match self {
            Self::Completed { stdout, .. }
            | Self::ExecutionFailed { stdout, .. }
            | Self::ResourceExceeded { stdout, .. } => stdout,
        }
    }

    /// Captured standard error, whatever the outcome.
    pub fn stderr(&self) -> &str {
        match self {
            Self::Completed { stderr, .. }
            | Self::ExecutionFailed { stderr, .. }
            | Self::ResourceExceeded { stderr, .. } => stderr,
        }
    }

    /// Extract the result value of a tool invocation.
    ///
    /// Tool entry points print their result as JSON on the last stdout line;
    /// earlier lines are free-form prints from the tool and are ignored.
    pub fn tool_output(&self) -> Result<serde_json::Value> {
        let Self::Completed { stdout, .. } = self else {
            return Err(SandboxError::UnparseableOutput(
                "execution did not complete".to_string(),
            ));
        };

        let last = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| SandboxError::UnparseableOutput("empty stdout".to_string()))?;

        serde_json::from_str(last.trim())
            .map_err(|e| SandboxError::UnparseableOutput(format!("{e}: {last}")))
    }
}

/// One finished sandboxed execution: the outcome plus what it cost.
#[derive(Debug, Clone)]
pub struct Execution {
    /// What happened.
    pub outcome: ExecutionOutcome,

    /// Wall-clock time the child was alive.
    pub duration: Duration,

    /// Scratch directory, present only when the runner was configured to
    /// keep it as an artifact bundle; otherwise it has been discarded.
    pub scratch: Option<PathBuf>,
}
