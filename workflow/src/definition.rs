//! The declarative workflow format.
//!
//! This is the wire format the engine consumes. It round-trips losslessly
//! through JSON: bindings are raw JSON values, optional fields are omitted
//! when absent, and maps keep a stable order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// Nested bodies deeper than this are rejected at load time.
const MAX_NESTING_DEPTH: usize = 16;

/// An ordered multi-step workflow over registry tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow identifier.
    pub id: String,

    /// What the workflow does.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Declared inputs: name → type hint. Documentation only; the engine
    /// takes actual input values at execution time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,

    /// Steps, executed in declaration order.
    pub steps: Vec<WorkflowStep>,
}

/// One step of a workflow.
///
/// Exactly one of `tool` and `body` must be set: a step either invokes a
/// registry tool or runs a nested sub-workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step id; the step's output is stored in context under this key.
    pub id: String,

    /// Tool id (or bare tool name) to invoke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Input bindings: parameter name → literal JSON value, or a string
    /// reference of the form `$var`, `$step.key`, or `$item`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bind: BTreeMap<String, serde_json::Value>,

    /// Condition gating execution; a falsy resolution skips the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Reference to a sequence; the step body runs once per element with
    /// `$item` bound in a fresh per-iteration scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<String>,

    /// Nested workflow executed instead of a tool invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Workflow>,
}

impl Workflow {
    /// Parse and validate a definition from JSON. Structural problems are
    /// rejected here, at load time, never during a run.
    pub fn from_json(json: &str) -> Result<Self> {
        let workflow: Workflow = serde_json::from_str(json)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Serialize the definition back to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check structural validity: non-empty unique step ids, exactly one of
    /// tool/body per step, and bounded nesting. The inline-body tree shape
    /// makes reference cycles unrepresentable; the depth cap bounds
    /// pathological definitions.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<()> {
        if depth > MAX_NESTING_DEPTH {
            return Err(WorkflowError::InvalidDefinition(format!(
                "workflow '{}' nests deeper than {MAX_NESTING_DEPTH} levels",
                self.id
            )));
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidDefinition(format!(
                "workflow '{}' has no steps",
                self.id
            )));
        }

        let mut seen = std::collections::BTreeSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(WorkflowError::InvalidDefinition(
                    "step with empty id".to_string(),
                ));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(WorkflowError::DuplicateStepId(step.id.clone()));
            }
            match (&step.tool, &step.body) {
                (Some(_), None) => {}
                (None, Some(body)) => body.validate_at(depth + 1)?,
                (Some(_), Some(_)) => {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "step '{}' declares both a tool and a nested body",
                        step.id
                    )));
                }
                (None, None) => {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "step '{}' declares neither a tool nor a nested body",
                        step.id
                    )));
                }
            }
        }
        Ok(())
    }
}
