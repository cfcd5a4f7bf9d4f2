//! # Workflow
//!
//! A workflow is an ordered sequence of steps over promoted tools, with
//! conditionals, `foreach` loops, and nested sub-workflows. The engine
//! interprets a definition against one shared [`ExecutionContext`],
//! dispatching every tool invocation through the sandbox with the tool's
//! stored security policy.
//!
//! ## Semantics
//!
//! - Steps run in declaration order, single-threaded
//! - A step's output is write-once and visible to every later step
//! - A falsy condition skips the step and records it as skipped —
//!   distinguishable from a step that ran and returned something falsy
//! - `foreach` over N elements runs the body N times in fresh per-iteration
//!   scopes and collects N outputs in source order
//! - Nested bodies are inline trees: cycles are unrepresentable and the
//!   nesting depth is capped at load time
//! - An unresolvable `$` reference is fatal; the engine never guesses

pub mod context;
pub mod definition;
pub mod engine;
pub mod error;

pub use context::{ExecutionContext, StepRecord};
pub use definition::{Workflow, WorkflowStep};
pub use engine::WorkflowEngine;
pub use error::{Result, WorkflowError};
