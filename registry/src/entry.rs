//! Registry entries: the promoted, addressable unit.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use toolforge_sandbox::SecurityPolicy;

use crate::spec::ToolSpec;
use crate::validation::ValidationResult;

/// Which model produced one lifecycle phase's output, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Lifecycle phase name (`spec`, `implementation`, `tests`, `embedding`).
    pub phase: String,

    /// Model identifier, including version where the provider reports one.
    pub model: String,

    /// When the output was produced.
    pub recorded_at: DateTime<Utc>,
}

/// Model-provenance record for a promoted tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// One record per generative phase, in phase order.
    pub records: Vec<PhaseRecord>,
}

impl Provenance {
    /// Record a phase output.
    pub fn record(&mut self, phase: impl Into<String>, model: impl Into<String>) {
        self.records.push(PhaseRecord {
            phase: phase.into(),
            model: model.into(),
            recorded_at: Utc::now(),
        });
    }
}

/// A promoted tool: metadata, artifact locations, validation evidence,
/// dependencies, policy, and provenance.
///
/// Entries are immutable once written. Promoting a new version of a name
/// creates a new entry under a new id; it never mutates an old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Stable id: tool name plus content hash, see [`tool_id`].
    pub tool_id: String,

    /// The spec the tool was generated and validated against.
    pub spec: ToolSpec,

    /// Path of the code artifact inside the entry directory.
    pub artifact_path: PathBuf,

    /// Path of the test artifact inside the entry directory.
    pub tests_path: PathBuf,

    /// The passing validation that justified promotion.
    pub validation: ValidationResult,

    /// Ids of tools this one calls; resolved at promotion time.
    pub dependencies: Vec<String>,

    /// Policy every execution of this tool runs under.
    pub policy: SecurityPolicy,

    /// Capability tags for listing (declared imports plus semantic tags).
    pub capabilities: Vec<String>,

    /// Which model produced each phase.
    pub provenance: Provenance,

    /// Description embedding cached at promotion time.
    pub embedding: Option<Vec<f32>>,

    /// When the entry was promoted.
    pub promoted_at: DateTime<Utc>,
}

impl RegistryEntry {
    /// Whether the entry carries the given capability tag.
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }
}

/// Derive a tool id from the spec and source code.
///
/// The id is the tool name followed by the first 12 hex characters of
/// `sha256(canonical_spec_json ‖ source)`. Equal content always derives the
/// same id, so re-promoting identical content is idempotent and changed
/// content gets a fresh, independently addressable id.
pub fn tool_id(spec: &ToolSpec, source: &str) -> crate::Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(spec.canonical_json()?.as_bytes());
    hasher.update(source.as_bytes());
    let digest = hex::encode(hasher.finalize());
    Ok(format!("{}-{}", spec.name, &digest[..12]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use std::collections::BTreeMap;

    fn minimal_spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            goal: "goal".to_string(),
            signature: format!("def {name}(x: int) -> int:"),
            docstring: "Does a thing.".to_string(),
            imports: vec![],
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            failure_modes: vec![],
            deterministic: true,
            tags: vec![],
            dependencies: vec![],
        }
    }

    #[test]
    fn tool_id_is_content_addressed() {
        let spec = minimal_spec("square");
        let a = tool_id(&spec, "def square(x):\n    return x * x\n").unwrap();
        let b = tool_id(&spec, "def square(x):\n    return x * x\n").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("square-"));

        let c = tool_id(&spec, "def square(x):\n    return x ** 2\n").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn tool_id_depends_on_spec() {
        let source = "def square(x):\n    return x * x\n";
        let a = tool_id(&minimal_spec("square"), source).unwrap();
        let mut changed = minimal_spec("square");
        changed.docstring = "Different contract.".to_string();
        let b = tool_id(&changed, source).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn provenance_records_in_order() {
        let mut provenance = Provenance::default();
        provenance.record("spec", "model-a");
        provenance.record("implementation", "model-b");
        assert_eq!(provenance.records.len(), 2);
        assert_eq!(provenance.records[0].phase, "spec");
        assert_eq!(provenance.records[1].model, "model-b");
    }
}
