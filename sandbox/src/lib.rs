//! # Sandbox
//!
//! This crate provides the isolated execution environment every untrusted
//! artifact in Toolforge runs inside, both at validation time and when a
//! promoted tool is invoked from a workflow.
//!
//! ## Guarantees
//!
//! - **No network**: the child is detached into its own network namespace
//! - **Confined writes**: filesystem writes are restricted to a scratch
//!   directory that is unique to the invocation
//! - **Hard ceilings**: address-space and CPU-time limits are enforced by the
//!   kernel and a breach terminates the process
//! - **Isolation between invocations**: every call owns its own process and
//!   scratch directory, so concurrent runs cannot affect each other
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Sandbox System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  SandboxRunner ──► child process ──► ExecutionOutcome           │
//! │       │               │                                         │
//! │       ▼               ▼                                         │
//! │  SecurityPolicy   rlimits / netns / Landlock / scratch dir      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod outcome;
pub mod policy;
pub mod runner;

pub use error::{Result, SandboxError};
pub use outcome::{Execution, ExecutionOutcome, ResourceKind};
pub use policy::{FilesystemPolicy, NetworkPolicy, SecurityPolicy};
pub use runner::{IsolationLevel, RunnerConfig, SandboxRunner};
