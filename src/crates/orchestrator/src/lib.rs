//! DAG workflow execution engine: the Executor, Backtracker, Budget
//! Planner (estimator, suggestions, runtime Enforcer), Event Publisher,
//! the `submit` entry point, and the schemas this engine expects an
//! external persistence layer to store.
//!
//! `workflow-core` owns the pure graph/plan/state data model; this crate
//! wires it to the async `llm` Adapter contract and drives real runs.

pub mod backoff;
pub mod backtracker;
pub mod budget;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;

pub use backoff::RetryConfig;
pub use backtracker::{execute, propagate_skips, StepOutcome, StepOutput as BacktrackerStepOutput};
pub use budget::{estimate, suggest, ConfidenceTier, CostEstimate, Enforcer, StepEstimate, Suggestion, SuggestionAction};
pub use config::EngineConfig;
pub use error::{OrchestratorError, Result};
pub use events::{BroadcastPublisher, Event, Publisher, PublishOutcome, RunStatus, RunTotals, Tokens};
pub use executor::{DependencyOutput, Executor, RunOutcome, StepInput};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use workflow_core::{ExecutionPlan, Graph, NodeStatus, StepOutput};

/// A stored workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub graph: Graph,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A submitted run's persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub graph_snapshot: Graph,
    #[serde(default)]
    pub budget: Option<BudgetRequest>,
    #[serde(default)]
    pub totals: Option<RunTotals>,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default)]
    pub execution_plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One node's persisted per-run record, flattened from `StepRecord` plus
/// identity and timing fields an external store owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub name: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    #[serde(default)]
    pub output: Option<StepOutput>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub tokens_prompt: u32,
    pub tokens_completion: u32,
    pub cost: f64,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    pub retries: u32,
    pub is_fallback: bool,
    #[serde(default)]
    pub fallback_for: Option<String>,
    pub execution_order: usize,
    pub parallel_group: usize,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetRequest {
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_cost: Option<f64>,
    /// Proceed past a pre-run estimate that exceeds `max_cost` instead of
    /// failing synchronously, so the caller can accept suggestions and
    /// resubmit rather than being blocked outright.
    #[serde(default)]
    pub accept_over_estimate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub run_id: String,
    pub plan: ExecutionPlan,
    pub estimate: CostEstimate,
    #[serde(default)]
    pub suggestions: Option<Vec<Suggestion>>,
}

/// Validate and plan `workflow`, estimate its cost, and (if a budget
/// ceiling is given) produce ranked suggestions. Synchronous and
/// side-effect free: no step runs yet. The caller starts the run itself
/// via [`Executor::run`] once it accepts the estimate.
pub fn submit(workflow: &Workflow, budget: Option<&BudgetRequest>, pricing: &llm::PricingTable, node_cap: usize) -> Result<SubmitResponse> {
    let plan = workflow_core::plan(&workflow.graph, node_cap)?;
    let estimate = budget::estimate(&plan, pricing);
    let run_id = uuid::Uuid::new_v4().to_string();

    let suggestions = budget.and_then(|b| b.max_cost).map(|max_cost| budget::suggest(&plan, &estimate, pricing, max_cost));

    if let Some(b) = budget {
        if let Some(max_cost) = b.max_cost {
            if estimate.total_cost > max_cost && !b.accept_over_estimate {
                return Err(OrchestratorError::BudgetExceededEstimate { estimated: estimate.total_cost, ceiling: max_cost });
            }
        }
    }

    Ok(SubmitResponse { run_id, plan, estimate, suggestions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use llm::PricingTable;
    use workflow_core::{AgentConfig, Node};

    fn sample_workflow() -> Workflow {
        let node = Node::agent(
            "a",
            AgentConfig {
                provider: "anthropic".into(),
                model: "claude-3-haiku".into(),
                system_prompt: "summarize".into(),
                temperature: 0.7,
                max_output_tokens: 256,
                max_retries: 2,
                timeout_secs: 30,
                fallback: None,
                memory_store_key: None,
                memory_recall_query: None,
            },
        );
        Workflow {
            id: "wf-1".into(),
            name: "summarizer".into(),
            description: None,
            graph: Graph::new(vec![node], vec![]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn submit_without_budget_always_succeeds() {
        let workflow = sample_workflow();
        let pricing = PricingTable::with_defaults();
        let response = submit(&workflow, None, &pricing, 50).unwrap();
        assert_eq!(response.plan.total_steps, 1);
        assert!(response.suggestions.is_none());
    }

    #[test]
    fn submit_over_budget_fails_unless_accepted() {
        let workflow = sample_workflow();
        let pricing = PricingTable::with_defaults();
        let tight = BudgetRequest { max_tokens: None, max_cost: Some(0.0000001), accept_over_estimate: false };
        let err = submit(&workflow, Some(&tight), &pricing, 50).unwrap_err();
        assert!(matches!(err, OrchestratorError::BudgetExceededEstimate { .. }));

        let accepted = BudgetRequest { accept_over_estimate: true, ..tight };
        let response = submit(&workflow, Some(&accepted), &pricing, 50).unwrap();
        assert!(response.suggestions.is_some());
    }
}
