//! Validation results.
//!
//! A `ValidationResult` is an immutable record of one validation run.
//! Re-validating produces a new record; nothing mutates an old one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use toolforge_sandbox::ResourceKind;

/// Overall verdict of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

/// A validation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lint,
    Tests,
    Coverage,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lint => write!(f, "lint"),
            Self::Tests => write!(f, "tests"),
            Self::Coverage => write!(f, "coverage"),
        }
    }
}

/// One finding from a validation run.
///
/// Coverage shortfalls and test failures are distinct variants so callers can
/// tell "tests failed" from "tests passed but under-covered".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A lint / static-check finding.
    Lint { message: String },

    /// A failing test.
    TestFailure { test: String },

    /// Coverage came in under the configured threshold.
    Coverage { percent: f32, threshold: f32 },

    /// The sandbox terminated a phase: resource ceiling breach or timeout.
    SandboxViolation {
        phase: Phase,
        resource: Option<ResourceKind>,
        detail: String,
    },
}

/// Resources observed over a validation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Total wall-clock time across all phases.
    pub wall_time: Duration,
}

/// The immutable result of one validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Pass or fail.
    pub verdict: Verdict,

    /// Findings, empty on a clean pass.
    pub diagnostics: Vec<Diagnostic>,

    /// Which phases actually ran (phases may be disabled by configuration).
    pub phases_run: Vec<Phase>,

    /// Observed resource usage.
    pub resource_usage: ResourceUsage,

    /// When the run finished.
    pub completed_at: DateTime<Utc>,
}

impl ValidationResult {
    /// Whether the verdict is a pass.
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// A passing result with no diagnostics.
    pub fn pass(phases_run: Vec<Phase>, resource_usage: ResourceUsage) -> Self {
        Self {
            verdict: Verdict::Pass,
            diagnostics: Vec::new(),
            phases_run,
            resource_usage,
            completed_at: Utc::now(),
        }
    }

    /// A failing result carrying the given diagnostics.
    pub fn fail(
        diagnostics: Vec<Diagnostic>,
        phases_run: Vec<Phase>,
        resource_usage: ResourceUsage,
    ) -> Self {
        Self {
            verdict: Verdict::Fail,
            diagnostics,
            phases_run,
            resource_usage,
            completed_at: Utc::now(),
        }
    }
}
