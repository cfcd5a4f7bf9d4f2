//! Strict parsers for generation-model output.
//!
//! Every phase boundary runs the model's text through one of these parsers.
//! The rule is schema-or-reject: a response that does not contain exactly the
//! expected shape is a generation failure and the phase is retried. There is
//! no best-effort coercion.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use toolforge_registry::{FailureMode, ToolSpec};

/// Why a model response was rejected at a phase boundary.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NoJsonObject,

    #[error("expected exactly one code block, found {0}")]
    WrongBlockCount(usize),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("spec does not conform to schema: {0}")]
    Schema(String),

    #[error("code block is empty")]
    EmptyCode,

    #[error("test code defines no test functions")]
    NoTests,
}

/// The shape a spec response must deserialize into.
///
/// `deny_unknown_fields` is the schema check: extra keys mean the model is
/// not following the contract and the response is rejected.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SpecDraft {
    name: String,
    signature: String,
    docstring: String,
    #[serde(default)]
    imports: Vec<String>,
    #[serde(default)]
    inputs: BTreeMap<String, String>,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
    #[serde(default)]
    failure_modes: Vec<FailureModeDraft>,
    deterministic: bool,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FailureModeDraft {
    exception: String,
    reason: String,
}

/// Parse a spec-phase response into an accepted [`ToolSpec`].
pub fn parse_spec(raw: &str, goal: &str) -> Result<ToolSpec, ParseError> {
    let json = extract_json_object(raw)?;
    let draft: SpecDraft =
        serde_json::from_str(&json).map_err(|e| ParseError::Schema(e.to_string()))?;

    let spec = ToolSpec {
        name: draft.name,
        goal: goal.to_string(),
        signature: draft.signature,
        docstring: draft.docstring,
        imports: draft.imports,
        inputs: draft.inputs,
        outputs: draft.outputs,
        failure_modes: draft
            .failure_modes
            .into_iter()
            .map(|f| FailureMode {
                exception: f.exception,
                reason: f.reason,
            })
            .collect(),
        deterministic: draft.deterministic,
        tags: draft.tags,
        dependencies: draft.dependencies,
    };

    spec.check().map_err(ParseError::Schema)?;
    Ok(spec)
}

/// Parse an implementation-phase response into source code.
pub fn parse_code(raw: &str) -> Result<String, ParseError> {
    let code = single_fenced_block(raw)?;
    if code.trim().is_empty() {
        return Err(ParseError::EmptyCode);
    }
    Ok(code)
}

/// Parse a test-phase response into test code.
pub fn parse_tests(raw: &str) -> Result<String, ParseError> {
    let tests = single_fenced_block(raw)?;
    if !tests.contains("def test_") {
        return Err(ParseError::NoTests);
    }
    Ok(tests)
}

/// Extract the single JSON object from a response.
///
/// Accepts exactly one fenced block containing a JSON object, or — when no
/// fences are present at all — a response that is itself one JSON object.
fn extract_json_object(raw: &str) -> Result<String, ParseError> {
    let blocks = fenced_blocks(raw);
    let candidate = match blocks.len() {
        0 => raw.trim().to_string(),
        1 => blocks.into_iter().next().unwrap_or_default(),
        n => return Err(ParseError::WrongBlockCount(n)),
    };

    if !candidate.starts_with('{') || !candidate.ends_with('}') {
        return Err(ParseError::NoJsonObject);
    }

    // Check it is valid JSON here so the caller can distinguish malformed
    // JSON from schema violations.
    let value: serde_json::Value =
        serde_json::from_str(&candidate).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    if !value.is_object() {
        return Err(ParseError::NoJsonObject);
    }

    Ok(candidate)
}

/// Extract the single fenced code block from a response.
fn single_fenced_block(raw: &str) -> Result<String, ParseError> {
    let blocks = fenced_blocks(raw);
    match blocks.len() {
        1 => Ok(blocks.into_iter().next().unwrap_or_default()),
        n => Err(ParseError::WrongBlockCount(n)),
    }
}

/// All ``` fenced blocks in a response, language tags stripped.
fn fenced_blocks(raw: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = raw;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        // The opening fence line may carry a language tag; content starts on
        // the next line.
        let body_start = after.find('\n').map_or(after.len(), |i| i + 1);
        let body = &after[body_start..];
        match body.find("```") {
            Some(end) => {
                blocks.push(body[..end].trim().to_string());
                rest = &body[end + 3..];
            }
            None => break,
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GOOD_SPEC: &str = r#"```json
{
  "name": "square",
  "signature": "def square(x: int) -> int:",
  "docstring": "Returns the square of an integer.",
  "imports": [],
  "inputs": {"x": "The number to square."},
  "outputs": {"result": "x squared."},
  "failure_modes": [{"exception": "TypeError", "reason": "x is not an integer"}],
  "deterministic": true
}
```"#;

    #[test]
    fn parses_a_well_formed_spec() {
        let spec = parse_spec(GOOD_SPEC, "calculate square of a number").unwrap();
        assert_eq!(spec.name, "square");
        assert_eq!(spec.goal, "calculate square of a number");
        assert!(spec.deterministic);
        assert_eq!(spec.failure_modes.len(), 1);
    }

    #[test]
    fn accepts_a_bare_json_object() {
        let raw = r#"{"name": "square", "signature": "def square(x: int) -> int:",
                      "docstring": "Squares.", "deterministic": true}"#;
        let spec = parse_spec(raw, "goal").unwrap();
        assert_eq!(spec.name, "square");
    }

    #[test]
    fn rejects_unknown_fields() {
        let raw = r#"{"name": "square", "signature": "def square(x):", "docstring": "d",
                      "deterministic": true, "confidence": 0.9}"#;
        assert!(matches!(parse_spec(raw, "goal"), Err(ParseError::Schema(_))));
    }

    #[test]
    fn rejects_missing_required_fields() {
        let raw = r#"{"name": "square", "docstring": "d"}"#;
        assert!(matches!(parse_spec(raw, "goal"), Err(ParseError::Schema(_))));
    }

    #[test]
    fn rejects_prose_around_bare_json() {
        let raw = "Sure! Here is the spec you asked for: {\"name\": \"square\"}";
        assert!(parse_spec(raw, "goal").is_err());
    }

    #[test]
    fn rejects_multiple_json_blocks() {
        let raw = format!("{GOOD_SPEC}\nand an alternative:\n{GOOD_SPEC}");
        assert!(matches!(
            parse_spec(&raw, "goal"),
            Err(ParseError::WrongBlockCount(2))
        ));
    }

    #[test]
    fn parses_a_single_code_block() {
        let raw = "```python\ndef square(x):\n    return x * x\n```";
        let code = parse_code(raw).unwrap();
        assert!(code.contains("return x * x"));
    }

    #[test]
    fn rejects_code_without_fences() {
        assert!(parse_code("def square(x):\n    return x * x").is_err());
    }

    #[test]
    fn rejects_empty_code_blocks() {
        assert!(matches!(parse_code("```python\n\n```"), Err(ParseError::EmptyCode)));
    }

    #[test]
    fn tests_must_define_test_functions() {
        let raw = "```python\nfrom square import square\n\ndef test_square():\n    assert square(5) == 25\n```";
        assert!(parse_tests(raw).is_ok());

        let raw = "```python\nprint('no tests here')\n```";
        assert!(matches!(parse_tests(raw), Err(ParseError::NoTests)));
    }

    #[test]
    fn fenced_block_extraction_strips_language_tags() {
        let blocks = fenced_blocks("prefix\n```json\n{\"a\": 1}\n```\nsuffix");
        assert_eq!(blocks, vec!["{\"a\": 1}".to_string()]);
    }
}
