//! The workflow execution engine.
//!
//! Single-threaded, step-ordered interpretation of a [`Workflow`] against one
//! shared [`ExecutionContext`]. Step order is a correctness guarantee, not an
//! optimization opportunity; the engine never reorders or parallelizes.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use toolforge_registry::Registry;
use toolforge_sandbox::{ExecutionOutcome, SandboxError, SandboxRunner};

use crate::context::ExecutionContext;
use crate::definition::{Workflow, WorkflowStep};
use crate::error::{Result, WorkflowError};

/// Memoized outputs of deterministic tools, keyed by (tool id, args).
type Memo = HashMap<(String, String), Value>;

/// Interprets workflow definitions over registry tools.
pub struct WorkflowEngine {
    registry: Registry,
    runner: Arc<SandboxRunner>,
}

impl WorkflowEngine {
    /// Create an engine over the given registry and sandbox runner.
    pub fn new(registry: Registry, runner: Arc<SandboxRunner>) -> Self {
        Self { registry, runner }
    }

    /// Execute a workflow with the given initial inputs.
    ///
    /// Returns the final context on success. Any step failure, unresolved
    /// reference, or sandbox violation aborts the whole run; the engine
    /// retries nothing.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        inputs: BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionContext> {
        workflow.validate()?;
        info!(workflow = %workflow.id, steps = workflow.steps.len(), "executing workflow");

        let mut ctx = ExecutionContext::with_inputs(inputs);
        let mut memo = Memo::new();
        self.execute_into(workflow, &mut ctx, &mut memo, cancel)
            .await?;
        Ok(ctx)
    }

    /// Run a workflow's steps into an existing context. Boxed because nested
    /// bodies recurse through here.
    fn execute_into<'a>(
        &'a self,
        workflow: &'a Workflow,
        ctx: &'a mut ExecutionContext,
        memo: &'a mut Memo,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            for step in &workflow.steps {
                if cancel.is_cancelled() {
                    return Err(WorkflowError::Cancelled);
                }

                if let Some(condition) = &step.condition {
                    if !evaluate_condition(condition, ctx)? {
                        debug!(step = %step.id, condition, "condition falsy; skipping step");
                        ctx.insert_skipped(&step.id)?;
                        continue;
                    }
                }

                let output = if let Some(source) = &step.foreach {
                    self.run_foreach(step, source, ctx, memo, cancel).await?
                } else {
                    self.run_step_once(step, ctx, memo, cancel).await?
                };

                ctx.insert_output(&step.id, output)?;
            }
            Ok(())
        })
    }

    /// Execute a `foreach` step: once per source element, `$item` bound in a
    /// fresh per-iteration scope, outputs collected in source order. An
    /// empty source yields an empty output without running the body.
    async fn run_foreach(
        &self,
        step: &WorkflowStep,
        source: &str,
        ctx: &ExecutionContext,
        memo: &mut Memo,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let resolved = resolve_term(source, ctx)?;
        let Value::Array(items) = resolved else {
            return Err(WorkflowError::NotASequence {
                step_id: step.id.clone(),
                reference: source.to_string(),
            });
        };

        let mut outputs = Vec::with_capacity(items.len());
        for item in items {
            let mut scope = ctx.child();
            scope.bind("item", item);
            outputs.push(self.run_step_once(step, &mut scope, memo, cancel).await?);
        }
        Ok(Value::Array(outputs))
    }

    /// Execute one step body: a nested workflow or a sandboxed tool
    /// invocation.
    async fn run_step_once(
        &self,
        step: &WorkflowStep,
        ctx: &mut ExecutionContext,
        memo: &mut Memo,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        if let Some(body) = &step.body {
            // Nested workflow: the child scope reads parent bindings and
            // its new outputs merge back as this step's output.
            let mut child = ctx.child();
            for (name, binding) in &step.bind {
                let value = resolve_binding(binding, ctx)?;
                child.bind(name.as_str(), value);
            }
            self.execute_into(body, &mut child, memo, cancel).await?;
            return Ok(Value::Object(child.outputs_since(ctx)));
        }

        let Some(tool_ref) = &step.tool else {
            // validate() rejects this shape at load time.
            return Err(WorkflowError::InvalidDefinition(format!(
                "step '{}' has no body and no tool",
                step.id
            )));
        };

        let mut args = serde_json::Map::new();
        for (name, binding) in &step.bind {
            args.insert(name.clone(), resolve_binding(binding, ctx)?);
        }

        let entry = self
            .registry
            .resolve(tool_ref)
            .await?
            .ok_or_else(|| WorkflowError::UnknownTool {
                step_id: step.id.clone(),
                tool: tool_ref.clone(),
            })?;

        let memo_key = (
            entry.tool_id.clone(),
            serde_json::to_string(&args).unwrap_or_default(),
        );
        if entry.spec.deterministic {
            if let Some(cached) = memo.get(&memo_key) {
                debug!(step = %step.id, tool = %entry.tool_id, "reusing memoized output");
                return Ok(cached.clone());
            }
        }

        debug!(step = %step.id, tool = %entry.tool_id, "invoking tool in sandbox");
        let execution = self
            .runner
            .run(
                &entry.artifact_path,
                &entry.spec.name,
                &Value::Object(args),
                &entry.policy,
                cancel,
            )
            .await
            .map_err(|e| match e {
                SandboxError::Cancelled => WorkflowError::Cancelled,
                other => WorkflowError::Sandbox(other),
            })?;

        let value = match &execution.outcome {
            ExecutionOutcome::Completed { .. } => execution
                .outcome
                .tool_output()
                .map_err(|e| WorkflowError::StepFailed {
                    step_id: step.id.clone(),
                    cause: format!("unparseable tool output: {e}"),
                })?,
            ExecutionOutcome::ResourceExceeded { kind, .. } => {
                return Err(WorkflowError::StepFailed {
                    step_id: step.id.clone(),
                    cause: format!("sandbox violation: {kind} ceiling exceeded"),
                });
            }
            ExecutionOutcome::ExecutionFailed {
                exit_code, stderr, ..
            } => {
                return Err(WorkflowError::StepFailed {
                    step_id: step.id.clone(),
                    cause: format!("exit code {exit_code}: {}", stderr.trim()),
                });
            }
        };

        if entry.spec.deterministic {
            memo.insert(memo_key, value.clone());
        }
        Ok(value)
    }
}

/// Resolve a binding value: strings starting with `$` are references, a
/// leading `$$` escapes a literal dollar sign, everything else is a literal.
fn resolve_binding(binding: &Value, ctx: &ExecutionContext) -> Result<Value> {
    match binding {
        Value::String(s) if s.starts_with("$$") => Ok(Value::String(s[1..].to_string())),
        Value::String(s) if s.starts_with('$') => ctx.resolve(&s[1..]),
        other => Ok(other.clone()),
    }
}

/// Resolve one side of a condition (or a `foreach` source): a `$` reference,
/// or a literal (JSON first, then a bare string with quotes stripped).
fn resolve_term(term: &str, ctx: &ExecutionContext) -> Result<Value> {
    let term = term.trim();
    if let Some(rest) = term.strip_prefix('$') {
        if let Some(literal) = rest.strip_prefix('$') {
            return Ok(Value::String(format!("${literal}")));
        }
        return ctx.resolve(rest);
    }
    if let Ok(value) = serde_json::from_str::<Value>(term) {
        return Ok(value);
    }
    Ok(Value::String(
        term.trim_matches(|c| c == '"' || c == '\'').to_string(),
    ))
}

/// Evaluate a condition: `==` / `!=` comparisons or bare truthiness. An
/// unresolvable reference is fatal, never silently false.
fn evaluate_condition(condition: &str, ctx: &ExecutionContext) -> Result<bool> {
    if let Some((lhs, rhs)) = condition.split_once("!=") {
        return Ok(!loosely_equal(
            &resolve_term(lhs, ctx)?,
            &resolve_term(rhs, ctx)?,
        ));
    }
    if let Some((lhs, rhs)) = condition.split_once("==") {
        return Ok(loosely_equal(
            &resolve_term(lhs, ctx)?,
            &resolve_term(rhs, ctx)?,
        ));
    }
    Ok(truthy(&resolve_term(condition, ctx)?))
}

/// Equality that also matches across representations ("5" == 5), the way
/// workflow authors write conditions.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    comparable(a) == comparable(b)
}

fn comparable(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
