//! The shared execution context.
//!
//! Maps step ids (and bound variables) to their produced values for one
//! workflow run. Entries are write-once; a skipped step is recorded
//! explicitly so it can never be confused with a step that ran and returned
//! something falsy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WorkflowError};

/// What the context records for one step or variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum StepRecord {
    /// The step ran and produced this value (inputs and loop variables are
    /// recorded the same way).
    Output(Value),

    /// The step's condition resolved falsy and the step did not run.
    Skipped,
}

/// Execution context for one workflow run and its nested sub-runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    values: BTreeMap<String, StepRecord>,
}

impl ExecutionContext {
    /// A context seeded with the run's initial inputs.
    pub fn with_inputs(inputs: BTreeMap<String, Value>) -> Self {
        Self {
            values: inputs
                .into_iter()
                .map(|(k, v)| (k, StepRecord::Output(v)))
                .collect(),
        }
    }

    /// A child scope that sees everything the parent has written. The child
    /// writes only into its own copy; the engine merges its new outputs back
    /// under the parent step's id.
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// Seed a scope variable (loop item, nested-workflow input), shadowing
    /// any parent binding of the same name. Not subject to write-once: this
    /// is scope setup, not a step output.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), StepRecord::Output(value));
    }

    /// Record a step's output. Write-once: a second write to the same id is
    /// an error.
    pub fn insert_output(&mut self, id: &str, value: Value) -> Result<()> {
        self.insert(id, StepRecord::Output(value))
    }

    /// Record a step as skipped. Write-once like outputs.
    pub fn insert_skipped(&mut self, id: &str) -> Result<()> {
        self.insert(id, StepRecord::Skipped)
    }

    fn insert(&mut self, id: &str, record: StepRecord) -> Result<()> {
        if self.values.contains_key(id) {
            return Err(WorkflowError::DuplicateStepId(id.to_string()));
        }
        self.values.insert(id.to_string(), record);
        Ok(())
    }

    /// The record for a step or variable, if present.
    pub fn get(&self, name: &str) -> Option<&StepRecord> {
        self.values.get(name)
    }

    /// All records, keyed by step id / variable name.
    pub fn records(&self) -> &BTreeMap<String, StepRecord> {
        &self.values
    }

    /// Outputs this context has written beyond what `parent` holds. This is
    /// what a nested body contributes; the engine stores it as the parent
    /// step's output. Skipped children contribute nothing.
    pub fn outputs_since(&self, parent: &Self) -> serde_json::Map<String, Value> {
        let mut merged = serde_json::Map::new();
        for (key, record) in &self.values {
            if parent.values.contains_key(key) {
                continue;
            }
            if let StepRecord::Output(value) = record {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Resolve a `$`-reference (without the leading `$`).
    ///
    /// `name` resolves the whole record; `name.key.subkey` traverses into
    /// object outputs. The path segment `output` on a non-object (or an
    /// object without an actual `output` key) resolves to the stored value
    /// itself, so `$step.output` always names a step's result. A skipped
    /// step resolves to `null`. A missing name or key is a fatal
    /// [`WorkflowError::UnresolvedReference`] — never a default.
    pub fn resolve(&self, reference: &str) -> Result<Value> {
        let mut segments = reference.split('.');
        let head = segments.next().unwrap_or(reference);

        let record = self
            .values
            .get(head)
            .ok_or_else(|| WorkflowError::UnresolvedReference {
                name: reference.to_string(),
            })?;

        let mut current = match record {
            StepRecord::Output(value) => value.clone(),
            StepRecord::Skipped => Value::Null,
        };

        for segment in segments {
            if let Some(next) = current.get(segment) {
                current = next.clone();
                continue;
            }
            if segment == "output" {
                // Canonical `$step.output` form over a bare value.
                continue;
            }
            return Err(WorkflowError::UnresolvedReference {
                name: reference.to_string(),
            });
        }

        Ok(current)
    }
}
