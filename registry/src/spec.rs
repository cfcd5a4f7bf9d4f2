//! Tool specifications.
//!
//! A `ToolSpec` is the contract a generated tool is built and validated
//! against. It is produced once per tool by the generation model and is
//! immutable after it enters the lifecycle; its canonical JSON feeds the
//! tool's content hash.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One declared way a tool can fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureMode {
    /// Exception type the tool raises for this case.
    pub exception: String,

    /// Why it is raised.
    pub reason: String,
}

/// Specification of a single tool.
///
/// `inputs` and `outputs` are ordered maps so the canonical JSON rendering is
/// byte-stable — the content hash depends on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Function name (snake_case identifier); also the entry point.
    pub name: String,

    /// The natural-language goal this tool was generated for.
    pub goal: String,

    /// Full function signature with type hints.
    pub signature: String,

    /// What the function does, its parameters, and its return value.
    pub docstring: String,

    /// Declared imports — the tool's capability profile, checked against the
    /// promotion allow-list.
    pub imports: Vec<String>,

    /// Parameter name → description.
    pub inputs: BTreeMap<String, String>,

    /// Output name → description.
    pub outputs: BTreeMap<String, String>,

    /// Enumerated failure cases.
    pub failure_modes: Vec<FailureMode>,

    /// Whether the tool is pure: same inputs, same outputs, no side effects.
    pub deterministic: bool,

    /// Capability tags for registry listing.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Tool ids this tool calls; all must resolve at promotion time.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ToolSpec {
    /// Canonical JSON rendering used for content hashing.
    ///
    /// Struct field order is fixed and the maps are sorted, so equal specs
    /// always render to equal bytes.
    pub fn canonical_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The text that gets embedded for semantic search.
    pub fn description(&self) -> String {
        format!("{}: {}", self.name, self.docstring)
    }

    /// Check structural well-formedness beyond what serde enforces.
    pub fn check(&self) -> std::result::Result<(), String> {
        if !is_snake_case_identifier(&self.name) {
            return Err(format!("name '{}' is not a valid identifier", self.name));
        }
        if self.signature.trim().is_empty() {
            return Err("signature is empty".to_string());
        }
        if self.docstring.trim().is_empty() {
            return Err("docstring is empty".to_string());
        }
        Ok(())
    }
}

/// Convert a free-form name into a safe module name.
pub fn safe_module_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if i == 0 && c.is_ascii_digit() {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

fn is_snake_case_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn square_spec() -> ToolSpec {
        ToolSpec {
            name: "square".to_string(),
            goal: "calculate square of a number".to_string(),
            signature: "def square(x: int) -> int:".to_string(),
            docstring: "Returns the square of an integer.".to_string(),
            imports: vec![],
            inputs: BTreeMap::from([("x".to_string(), "The number to square.".to_string())]),
            outputs: BTreeMap::from([("result".to_string(), "x squared.".to_string())]),
            failure_modes: vec![FailureMode {
                exception: "TypeError".to_string(),
                reason: "x is not an integer".to_string(),
            }],
            deterministic: true,
            tags: vec!["math".to_string()],
            dependencies: vec![],
        }
    }

    #[test]
    fn canonical_json_is_stable() {
        let a = square_spec().canonical_json().unwrap();
        let b = square_spec().canonical_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn check_accepts_well_formed_spec() {
        assert!(square_spec().check().is_ok());
    }

    #[test]
    fn check_rejects_bad_names() {
        let mut spec = square_spec();
        spec.name = "Square It!".to_string();
        assert!(spec.check().is_err());

        spec.name = "2fast".to_string();
        assert!(spec.check().is_err());
    }

    #[test]
    fn safe_module_name_sanitizes() {
        assert_eq!(safe_module_name("read-file v2"), "read_file_v2");
        assert_eq!(safe_module_name("2fast"), "_2fast");
        assert_eq!(safe_module_name("square"), "square");
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec = square_spec();
        let json = serde_json::to_string(&spec).unwrap();
        let back: ToolSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
