//! Shared fixtures for registry tests.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;

use toolforge_sandbox::SecurityPolicy;

use crate::entry::{Provenance, RegistryEntry, tool_id};
use crate::spec::ToolSpec;
use crate::validation::{Diagnostic, Phase, ResourceUsage, ValidationResult};

pub(crate) fn spec_for(name: &str) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        goal: format!("a tool named {name}"),
        signature: format!("def {name}(x: int) -> int:"),
        docstring: format!("The {name} tool."),
        imports: vec![],
        inputs: BTreeMap::from([("x".to_string(), "input".to_string())]),
        outputs: BTreeMap::from([("result".to_string(), "output".to_string())]),
        failure_modes: vec![],
        deterministic: true,
        tags: vec![],
        dependencies: vec![],
    }
}

pub(crate) fn entry_for(name: &str, source: &str) -> RegistryEntry {
    let spec = spec_for(name);
    let id = tool_id(&spec, source).expect("hashable spec");
    RegistryEntry {
        tool_id: id,
        spec,
        artifact_path: PathBuf::new(),
        tests_path: PathBuf::new(),
        validation: ValidationResult::pass(
            vec![Phase::Lint, Phase::Tests],
            ResourceUsage::default(),
        ),
        dependencies: vec![],
        policy: SecurityPolicy::default(),
        capabilities: vec![],
        provenance: Provenance::default(),
        embedding: None,
        promoted_at: Utc::now(),
    }
}

pub(crate) fn failing_validation() -> ValidationResult {
    ValidationResult::fail(
        vec![Diagnostic::TestFailure {
            test: "test_example".to_string(),
        }],
        vec![Phase::Tests],
        ResourceUsage::default(),
    )
}
