//! Command-line driver for the workflow execution engine.

use clap::{Parser, Subcommand};
use llm::{Adapter, PricingTable, StaticAdapterRegistry};
use orchestrator::{BroadcastPublisher, BudgetRequest, Enforcer, Executor, Workflow};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "workflow-engine-cli")]
#[command(about = "DAG workflow execution engine", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to the engine config file (YAML or TOML). Defaults apply if absent.
    #[arg(long, global = true, default_value = "workflow-engine.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow definition and print its execution plan
    Plan {
        /// Path to a workflow definition JSON file
        workflow: PathBuf,
    },
    /// Validate, plan, and print a static cost estimate and suggestions
    Estimate {
        workflow: PathBuf,
        #[arg(long)]
        max_cost: Option<f64>,
    },
    /// Plan and run a workflow against scripted/local adapters
    Submit {
        workflow: PathBuf,
        #[arg(long)]
        input: Option<String>,
        #[arg(long)]
        max_tokens: Option<u64>,
        #[arg(long)]
        max_cost: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let engine_config = orchestrator::EngineConfig::load(&cli.config).await?;
    let pricing = PricingTable::with_defaults();

    match cli.command {
        Commands::Plan { workflow } => {
            let workflow = load_workflow(&workflow)?;
            let plan = workflow_core::plan(&workflow.graph, engine_config.node_cap)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Estimate { workflow, max_cost } => {
            let workflow = load_workflow(&workflow)?;
            let budget = max_cost.map(|max_cost| BudgetRequest { max_tokens: None, max_cost: Some(max_cost), accept_over_estimate: true });
            let response = orchestrator::submit(&workflow, budget.as_ref(), &pricing, engine_config.node_cap)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Submit { workflow, input, max_tokens, max_cost } => {
            let workflow = load_workflow(&workflow)?;
            let budget = if max_tokens.is_some() || max_cost.is_some() {
                Some(BudgetRequest { max_tokens, max_cost, accept_over_estimate: true })
            } else {
                None
            };
            let response = orchestrator::submit(&workflow, budget.as_ref(), &pricing, engine_config.node_cap)?;
            info!(run_id = %response.run_id, confidence = ?response.estimate.confidence, "plan accepted");

            let registry = build_registry(&workflow, &engine_config, Arc::new(pricing.clone()));
            let publisher = Arc::new(BroadcastPublisher::new(engine_config.event_channel_capacity.unwrap_or(256)));
            let executor = Executor::new(Arc::new(registry), publisher).with_retry_config((&engine_config.retry).into());
            let enforcer = Enforcer::new(budget.as_ref().and_then(|b| b.max_tokens), budget.as_ref().and_then(|b| b.max_cost));

            let outcome = executor.run(&response.plan, input, &enforcer, CancellationToken::new(), response.run_id).await;
            println!("{}", serde_json::to_string_pretty(&outcome.totals)?);
            if !matches!(outcome.status, orchestrator::RunStatus::Completed) {
                error!(status = ?outcome.status, "run did not complete cleanly");
            }
        }
    }

    Ok(())
}

fn load_workflow(path: &PathBuf) -> anyhow::Result<Workflow> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Build an adapter registry covering every distinct `(provider, model)`
/// pair named by the workflow's agent nodes, using `engine_config` for API
/// keys and base URLs. Unknown providers are skipped with a warning rather
/// than failing the whole run at registry-build time; resolution failure
/// surfaces per-step as a `Configuration` error when that node actually runs.
fn build_registry(workflow: &Workflow, engine_config: &orchestrator::EngineConfig, pricing: Arc<PricingTable>) -> StaticAdapterRegistry {
    let mut registry = StaticAdapterRegistry::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for node in &workflow.graph.nodes {
        let Some(agent) = node.agent_config() else { continue };
        let key = (agent.provider.clone(), agent.model.clone());
        if !seen.insert(key.clone()) {
            continue;
        }

        let (provider, model) = key;
        let adapter: Option<Arc<dyn Adapter>> = match provider.as_str() {
            "anthropic" => {
                let api_key = engine_config.api_key(&provider).unwrap_or_default();
                let base_url = engine_config.api_base(&provider).unwrap_or_else(|| "https://api.anthropic.com".to_string());
                let config = llm::config::RemoteLlmConfig::new(api_key, base_url, model.clone());
                Some(Arc::new(llm::remote::ClaudeAdapter::new(config, pricing.clone())))
            }
            "openai" => {
                let api_key = engine_config.api_key(&provider).unwrap_or_default();
                let base_url = engine_config.api_base(&provider).unwrap_or_else(|| "https://api.openai.com/v1".to_string());
                let config = llm::config::RemoteLlmConfig::new(api_key, base_url, model.clone());
                Some(Arc::new(llm::remote::OpenAiAdapter::new(config, pricing.clone())))
            }
            "ollama" => {
                let base_url = engine_config.api_base(&provider).unwrap_or_else(|| "http://localhost:11434".to_string());
                let config = llm::config::LocalLlmConfig::new(base_url, model.clone());
                Some(Arc::new(llm::local::OllamaAdapter::new(config, pricing.clone())))
            }
            other => {
                warn!(provider = other, model = %model, "no adapter implementation for provider, step will fail at run time");
                None
            }
        };

        if let Some(adapter) = adapter {
            registry.register(adapter);
        }
    }

    registry
}
