//! Command-line entry points into the Toolforge core: create a tool, run a
//! workflow, search the registry. Flag handling only; all behavior lives in
//! the library crates.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use toolforge_embeddings::{EmbeddingProvider, OllamaEmbedder};
use toolforge_lifecycle::{
    LifecycleConfig, OllamaClient, Toolchain, ToolLifecycle, ValidationConfig, Validator,
};
use toolforge_registry::Registry;
use toolforge_sandbox::{IsolationLevel, RunnerConfig, SandboxRunner};
use toolforge_workflow::{Workflow, WorkflowEngine};

#[derive(Parser)]
#[command(name = "toolforge", about = "Generate, validate, and compose sandboxed tools")]
struct Cli {
    /// Registry directory (defaults under the user data dir).
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Base URL of the Ollama server.
    #[arg(long, default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Generation model.
    #[arg(long, default_value = "qwen2.5-coder:7b")]
    model: String,

    /// Embedding model; omit to fall back to keyword search.
    #[arg(long)]
    embed_model: Option<String>,

    /// Degrade sandbox isolation instead of failing closed when the kernel
    /// refuses namespaces (containers, CI).
    #[arg(long)]
    best_effort_isolation: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, validate, and promote a tool for a goal.
    Create {
        /// Natural-language goal for the tool.
        goal: String,
    },

    /// Execute a workflow definition against promoted tools.
    Run {
        /// Path to the workflow JSON document.
        workflow: PathBuf,

        /// Initial inputs as a JSON object.
        #[arg(long)]
        inputs: Option<String>,
    },

    /// Search promoted tools.
    Search {
        /// Free-text query.
        query: String,

        /// Maximum results.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let registry_dir = cli.registry.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("toolforge/registry")
    });
    let registry = Registry::open(&registry_dir)
        .await
        .with_context(|| format!("opening registry at {}", registry_dir.display()))?;

    let isolation = if cli.best_effort_isolation {
        IsolationLevel::BestEffort
    } else {
        IsolationLevel::Enforced
    };
    let runner = Arc::new(SandboxRunner::new(
        RunnerConfig::default().with_isolation(isolation),
    ));

    // Ctrl-C propagates as cancellation: in-flight sandboxed processes are
    // killed and in-flight model calls abandoned.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let embedder: Option<Arc<dyn EmbeddingProvider>> = cli.embed_model.as_ref().map(|model| {
        Arc::new(OllamaEmbedder::new(model.clone()).with_base_url(cli.ollama_url.clone()))
            as Arc<dyn EmbeddingProvider>
    });

    match cli.command {
        Commands::Create { goal } => {
            let model =
                Arc::new(OllamaClient::new(cli.model.clone()).with_base_url(cli.ollama_url.clone()));
            let validator =
                Validator::new(runner, Toolchain::pytest(), ValidationConfig::default());
            let mut lifecycle =
                ToolLifecycle::new(model, validator, registry, LifecycleConfig::default());
            if let Some(embedder) = embedder {
                lifecycle = lifecycle.with_embedder(embedder);
            }

            info!(goal, "starting tool lifecycle");
            let entry = lifecycle.run(&goal, &cancel).await?;
            println!("promoted {} ({})", entry.spec.name, entry.tool_id);
            println!("  artifact: {}", entry.artifact_path.display());
        }

        Commands::Run { workflow, inputs } => {
            let document = tokio::fs::read_to_string(&workflow)
                .await
                .with_context(|| format!("reading {}", workflow.display()))?;
            let workflow = Workflow::from_json(&document)?;

            let inputs: BTreeMap<String, serde_json::Value> = match inputs {
                Some(raw) => serde_json::from_str(&raw).context("parsing --inputs")?,
                None => BTreeMap::new(),
            };

            let engine = WorkflowEngine::new(registry, runner);
            let context = engine.execute(&workflow, inputs, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(context.records())?);
        }

        Commands::Search { query, limit } => {
            let hits = registry
                .search(&query, embedder.as_deref(), limit)
                .await?;
            if hits.is_empty() {
                bail!("no matching tools");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{:2}. {} ({:.3})  {}",
                    rank + 1,
                    hit.entry.tool_id,
                    hit.score,
                    hit.entry.spec.docstring.lines().next().unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}
