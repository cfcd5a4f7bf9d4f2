//! Prompt builders for the generative phases.
//!
//! Each builder carries the accumulated context forward: the spec prompt sees
//! the goal, the implementation prompt sees the accepted spec, and the test
//! prompt sees both the spec and the entry-point name.

/// System framing shared by all phases.
pub const SYSTEM: &str =
    "You are an expert software engineer specializing in creating self-contained, \
     production-quality Python tools. You respond with exactly what is asked for, \
     inside a single markdown code fence, and nothing else.";

/// Prompt for the spec phase.
pub fn spec_prompt(goal: &str) -> String {
    format!(
        r#"Generate a JSON specification for a Python function that accomplishes this goal:

"{goal}"

The JSON object must have exactly these keys:
- "name" (str): a valid snake_case Python function name
- "signature" (str): the full function signature with type hints
- "docstring" (str): what the function does, its parameters, and its return value
- "imports" (list[str]): standard-library modules required; no external libraries
- "inputs" (dict[str, str]): parameter name -> description, matching the signature exactly
- "outputs" (dict[str, str]): description of the return value(s)
- "failure_modes" (list): objects with "exception" and "reason" keys
- "deterministic" (bool): true if the same input always produces the same output

Return ONLY the JSON object in a single ```json code fence."#
    )
}

/// Prompt for the implementation phase.
pub fn implementation_prompt(spec_json: &str, name: &str) -> String {
    format!(
        r#"Implement the function `{name}` exactly as described by this contract:

```json
{spec_json}
```

Rules:
- Implement the actual logic; no placeholders, no "pass", no TODO bodies.
- Use only the imports declared in the contract.
- Raise the declared exceptions for the declared failure modes.
- No example usage and no `if __name__ == "__main__"` block.

Return ONLY the Python code in a single ```python code fence."#
    )
}

/// Prompt for the test phase.
pub fn tests_prompt(spec_json: &str, name: &str) -> String {
    format!(
        r#"Write a complete Python test file for the function described by this contract:

```json
{spec_json}
```

Rules:
- Import the function with `from {name} import {name}`.
- Call the function exactly as its signature declares; do not invent extra arguments.
- Cover the happy path, every declared failure mode, edge cases (zero, negative,
  empty inputs), and at least one adversarial input.
- Name every test function `test_*`.

Return ONLY the Python test code in a single ```python code fence."#
    )
}
