//! The forward-only tool lifecycle state machine.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use toolforge_embeddings::EmbeddingProvider;
use toolforge_registry::{
    Provenance, Registry, RegistryEntry, ToolSpec, safe_module_name, tool_id,
};
use toolforge_sandbox::SecurityPolicy;

use crate::error::{LifecycleError, Result};
use crate::model::{GenerationModel, ModelError};
use crate::parse::{self, ParseError};
use crate::prompts;
use crate::validator::Validator;

/// The generative phases, in machine order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Goal → spec.
    Drafting,
    /// Spec → implementation.
    Implementing,
    /// Spec + implementation → test suite.
    Testing,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drafting => write!(f, "drafting"),
            Self::Implementing => write!(f, "implementing"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Configuration for one lifecycle instance.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Extra attempts per generative phase after the first, when the model's
    /// output fails the strict parser.
    pub max_generation_retries: u32,

    /// Imports a spec may declare. Network- and process-capable modules are
    /// never in the default list; declaring one is a policy rejection even
    /// when every test passes.
    pub allowed_imports: Vec<String>,

    /// Policy the tool is validated under and stored with.
    pub policy: SecurityPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_generation_retries: 2,
            allowed_imports: [
                "collections",
                "csv",
                "datetime",
                "functools",
                "itertools",
                "json",
                "math",
                "os",
                "pathlib",
                "random",
                "re",
                "string",
                "textwrap",
                "typing",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            policy: SecurityPolicy::default(),
        }
    }
}

/// Drives one tool from goal to promotion (or typed rejection).
///
/// Instances for different goals are independent; run any number
/// concurrently. Two lifecycles promoting the same content race only at the
/// registry `put`, whose atomicity resolves the race.
pub struct ToolLifecycle {
    model: Arc<dyn GenerationModel>,
    validator: Validator,
    registry: Registry,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: LifecycleConfig,
}

impl ToolLifecycle {
    /// Create a lifecycle.
    pub fn new(
        model: Arc<dyn GenerationModel>,
        validator: Validator,
        registry: Registry,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            model,
            validator,
            registry,
            embedder: None,
            config,
        }
    }

    /// Attach an embedding collaborator; promoted entries then carry a cached
    /// description embedding for semantic search.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Run the machine: Drafting → Implemented → Tested → Validated →
    /// Promoted, or a typed rejection.
    pub async fn run(&self, goal: &str, cancel: &CancellationToken) -> Result<RegistryEntry> {
        let mut provenance = Provenance::default();

        // Drafting → Implemented → Tested. Each transition consumes the
        // model with the accumulated context and parses strictly.
        let spec = self
            .generate_phase(
                LifecyclePhase::Drafting,
                &prompts::spec_prompt(goal),
                |raw| parse::parse_spec(raw, goal),
                cancel,
            )
            .await?;
        provenance.record("spec", self.model.model_id());
        debug!(name = %spec.name, "accepted spec");

        let spec_json = spec.canonical_json()?;

        let source = self
            .generate_phase(
                LifecyclePhase::Implementing,
                &prompts::implementation_prompt(&spec_json, &spec.name),
                parse::parse_code,
                cancel,
            )
            .await?;
        provenance.record("implementation", self.model.model_id());

        let tests = self
            .generate_phase(
                LifecyclePhase::Testing,
                &prompts::tests_prompt(&spec_json, &spec.name),
                parse::parse_tests,
                cancel,
            )
            .await?;
        provenance.record("tests", self.model.model_id());

        // Pre-promotion artifacts live in scratch only; the working directory
        // is discarded whether or not promotion happens.
        let workdir = tempfile::Builder::new()
            .prefix("toolforge-build-")
            .tempdir()?;
        let module = safe_module_name(&spec.name);
        let artifact_path = workdir.path().join(format!("{module}.py"));
        let tests_path = workdir.path().join(format!("test_{module}.py"));
        tokio::fs::write(&artifact_path, &source).await?;
        tokio::fs::write(&tests_path, &tests).await?;

        // Tested → Validated.
        let validation = self
            .validator
            .validate(&artifact_path, &tests_path, &self.config.policy, cancel)
            .await?;
        if !validation.passed() {
            return Err(LifecycleError::Validation(Box::new(validation)));
        }

        // Validated → Promoted only if the gates clear; a policy or
        // dependency violation rejects even with a passing verdict.
        if let Some(capability) = spec.imports.iter().find(|import| {
            !self
                .config
                .allowed_imports
                .iter()
                .any(|allowed| allowed == *import)
        }) {
            return Err(LifecycleError::Policy {
                capability: capability.clone(),
            });
        }
        for dependency in &spec.dependencies {
            if !self.registry.contains(dependency).await? {
                return Err(LifecycleError::Dependency {
                    tool_id: dependency.clone(),
                });
            }
        }

        let embedding = match &self.embedder {
            Some(embedder) => {
                let vector = embedder.embed(&spec.description()).await?;
                provenance.record("embedding", embedder.model());
                Some(vector)
            }
            None => None,
        };

        let entry = RegistryEntry {
            tool_id: tool_id(&spec, &source)?,
            capabilities: capability_tags(&spec),
            dependencies: spec.dependencies.clone(),
            artifact_path: artifact_path.clone(),
            tests_path: tests_path.clone(),
            spec,
            validation,
            policy: self.config.policy.clone(),
            provenance,
            embedding,
            promoted_at: Utc::now(),
        };

        // Promotion: the single durable side effect of the whole machine.
        let entry = self.registry.put(entry, &source, &tests).await?;
        info!(tool_id = %entry.tool_id, "lifecycle complete: tool promoted");
        Ok(entry)
    }

    /// Consume the model for one phase, retrying on malformed output up to
    /// the configured bound. Transport failures and timeouts consume
    /// attempts exactly like parse failures; cancellation does not.
    async fn generate_phase<T>(
        &self,
        phase: LifecyclePhase,
        prompt: &str,
        parse: impl Fn(&str) -> std::result::Result<T, ParseError>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let attempts = self.config.max_generation_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(LifecycleError::Cancelled);
            }
            match self.model.complete(prompts::SYSTEM, prompt, cancel).await {
                Ok(raw) => match parse(&raw) {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        warn!(%phase, attempt, "discarding malformed model output: {e}");
                        last_error = e.to_string();
                    }
                },
                Err(ModelError::Cancelled) => return Err(LifecycleError::Cancelled),
                Err(e) => {
                    warn!(%phase, attempt, "model call failed: {e}");
                    last_error = e.to_string();
                }
            }
        }

        Err(LifecycleError::Generation {
            phase,
            attempts,
            detail: last_error,
        })
    }
}

/// Capability tags recorded on the promoted entry: declared imports plus the
/// spec's semantic tags.
fn capability_tags(spec: &ToolSpec) -> Vec<String> {
    let mut tags = spec.imports.clone();
    for tag in &spec.tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}
