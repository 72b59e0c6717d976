//! End-to-end Executor scenarios exercising retry, fallback substitution,
//! skip propagation, conditional branching, and budget-aware submission
//! together rather than in isolation.

use llm::testing::{Scripted, ScriptedAdapter};
use llm::{LlmError, PricingTable, StaticAdapterRegistry};
use orchestrator::{BudgetRequest, Enforcer, Executor, OrchestratorError, RunStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use workflow_core::{plan, AgentConfig, ConditionalConfig, Edge, EdgeCondition, Graph, Node, NodeStatus};

fn agent(id: &str) -> Node {
    agent_with_fallback(id, None)
}

fn agent_with_fallback(id: &str, fallback: Option<&str>) -> Node {
    Node::agent(
        id,
        AgentConfig {
            provider: "anthropic".into(),
            model: "claude-3-haiku".into(),
            system_prompt: "do the thing".into(),
            temperature: 0.7,
            max_output_tokens: 128,
            max_retries: 2,
            timeout_secs: 5,
            fallback: fallback.map(|s| s.to_string()),
            memory_store_key: None,
            memory_recall_query: None,
        },
    )
}

fn fast_retry_config() -> orchestrator::RetryConfig {
    orchestrator::RetryConfig { max_retries: 2, base_ms: 1, cap_ms: 5, jitter: false }
}

#[tokio::test]
async fn retry_then_success_completes_with_two_attempts() {
    let graph = Graph::new(vec![agent("a")], vec![]);
    let planned = plan(&graph, 50).unwrap();

    let mut registry = StaticAdapterRegistry::new();
    registry.register(Arc::new(ScriptedAdapter::new(
        "anthropic",
        "claude-3-haiku",
        vec![
            Scripted::Fail(|| LlmError::ServiceUnavailable("overloaded".into())),
            Scripted::Succeed { text: "done".into(), tokens_prompt: 10, tokens_completion: 5, cost: 0.001 },
        ],
    )));

    let executor = Executor::new(Arc::new(registry), Arc::new(orchestrator::BroadcastPublisher::default()))
        .with_retry_config(fast_retry_config());
    let enforcer = Enforcer::unbounded();
    let outcome = executor.run(&planned, None, &enforcer, CancellationToken::new(), "retry-1").await;

    assert_eq!(outcome.status, RunStatus::Completed);
    let record = &outcome.run_state.steps["a"];
    assert_eq!(record.attempts, 2);
    assert_eq!(record.output.as_ref().unwrap().text, "done");
}

#[tokio::test]
async fn fallback_output_feeds_downstream_when_original_exhausts_retries() {
    // "a" and its fallback must resolve to distinct adapters, so pin them to
    // different models even though both are plain agent nodes otherwise.
    let a_node = Node::agent(
        "a",
        AgentConfig {
            provider: "anthropic".into(),
            model: "claude-3-opus".into(),
            system_prompt: "do the thing".into(),
            temperature: 0.7,
            max_output_tokens: 128,
            max_retries: 1,
            timeout_secs: 5,
            fallback: Some("a-fallback".into()),
            memory_store_key: None,
            memory_recall_query: None,
        },
    );
    let graph = Graph::new(
        vec![a_node, agent("a-fallback"), agent("c")],
        vec![Edge::new("a", "a-fallback"), Edge::new("a", "c")],
    );
    let planned = plan(&graph, 50).unwrap();

    let mut registry = StaticAdapterRegistry::new();
    registry.register(Arc::new(ScriptedAdapter::new(
        "anthropic",
        "claude-3-opus",
        vec![Scripted::Fail(|| LlmError::ServiceUnavailable("down".into()))],
    )));
    registry.register(Arc::new(ScriptedAdapter::always_succeed("anthropic", "claude-3-haiku", "recovered")));

    let executor = Executor::new(Arc::new(registry), Arc::new(orchestrator::BroadcastPublisher::default()))
        .with_retry_config(fast_retry_config());
    let enforcer = Enforcer::unbounded();
    let outcome = executor.run(&planned, None, &enforcer, CancellationToken::new(), "fallback-1").await;

    // "a" fails terminally but its fallback recovers, so the run is not a
    // hard failure and "c" still executes off the fallback's output.
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.run_state.status_of("a"), Some(NodeStatus::Failed));
    assert_eq!(outcome.run_state.status_of("a-fallback"), Some(NodeStatus::Completed));
    assert_eq!(outcome.run_state.status_of("c"), Some(NodeStatus::Completed));
}

#[tokio::test]
async fn failed_parent_with_surviving_sibling_does_not_skip_shared_child() {
    // a -> c, b -> c: "a" fails but "b" completes, so "c" still runs with a
    // partial input map instead of being skipped. "a" and "b" are pinned to
    // distinct models so each gets its own deterministic scripted adapter
    // rather than racing on a shared one.
    let a_node = Node::agent(
        "a",
        AgentConfig {
            provider: "anthropic".into(),
            model: "claude-3-opus".into(),
            system_prompt: "do the thing".into(),
            temperature: 0.7,
            max_output_tokens: 128,
            max_retries: 0,
            timeout_secs: 5,
            fallback: None,
            memory_store_key: None,
            memory_recall_query: None,
        },
    );
    let graph = Graph::new(vec![a_node, agent("b"), agent("c")], vec![Edge::new("a", "c"), Edge::new("b", "c")]);
    let planned = plan(&graph, 50).unwrap();

    let mut registry = StaticAdapterRegistry::new();
    registry.register(Arc::new(ScriptedAdapter::new(
        "anthropic",
        "claude-3-opus",
        vec![Scripted::Fail(|| LlmError::AuthenticationError("bad key".into()))],
    )));
    registry.register(Arc::new(ScriptedAdapter::always_succeed("anthropic", "claude-3-haiku", "ok")));

    let executor = Executor::new(Arc::new(registry), Arc::new(orchestrator::BroadcastPublisher::default()))
        .with_retry_config(fast_retry_config());
    let enforcer = Enforcer::unbounded();
    let outcome = executor.run(&planned, None, &enforcer, CancellationToken::new(), "skip-1").await;

    assert_eq!(outcome.run_state.status_of("a"), Some(NodeStatus::Failed));
    assert_eq!(outcome.run_state.status_of("b"), Some(NodeStatus::Completed));
    assert_eq!(outcome.run_state.status_of("c"), Some(NodeStatus::Completed));
    assert_eq!(outcome.status, RunStatus::Failed);
}

#[tokio::test]
async fn conditional_branch_skips_the_untaken_path() {
    let decider = Node::conditional(
        "decide",
        ConditionalConfig {
            condition: "text".into(),
            branches: std::collections::BTreeMap::new(),
            default_branch: None,
        },
    );
    let graph = Graph::new(
        vec![agent("source"), decider, agent("yes_path"), agent("no_path")],
        vec![
            Edge::new("source", "decide"),
            Edge { from: "decide".into(), to: "yes_path".into(), condition: Some(EdgeCondition::Equals("yes".into())) },
            Edge { from: "decide".into(), to: "no_path".into(), condition: Some(EdgeCondition::Default) },
        ],
    );
    let planned = plan(&graph, 50).unwrap();

    let mut registry = StaticAdapterRegistry::new();
    registry.register(Arc::new(ScriptedAdapter::always_succeed("anthropic", "claude-3-haiku", "yes")));

    let executor = Executor::new(Arc::new(registry), Arc::new(orchestrator::BroadcastPublisher::default()));
    let enforcer = Enforcer::unbounded();
    let outcome = executor.run(&planned, None, &enforcer, CancellationToken::new(), "cond-1").await;

    assert_eq!(outcome.run_state.status_of("yes_path"), Some(NodeStatus::Completed));
    assert_eq!(outcome.run_state.status_of("no_path"), Some(NodeStatus::Skipped));
    assert_eq!(outcome.status, RunStatus::CompletedWithSkips);
}

#[tokio::test]
async fn submit_over_budget_yields_downgrade_suggestions() {
    let expensive = Node::agent(
        "summarize",
        AgentConfig {
            provider: "anthropic".into(),
            model: "claude-3-opus".into(),
            system_prompt: "summarize the entire document in detail".into(),
            temperature: 0.7,
            max_output_tokens: 1024,
            max_retries: 2,
            timeout_secs: 30,
            fallback: None,
            memory_store_key: None,
            memory_recall_query: None,
        },
    );
    let workflow = orchestrator::Workflow {
        id: "wf-budget".into(),
        name: "summarizer".into(),
        description: None,
        graph: Graph::new(vec![expensive], vec![]),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };

    let pricing = PricingTable::with_defaults();
    let tight = BudgetRequest { max_tokens: None, max_cost: Some(0.01), accept_over_estimate: false };
    let err = orchestrator::submit(&workflow, Some(&tight), &pricing, 50).unwrap_err();
    assert!(matches!(err, OrchestratorError::BudgetExceededEstimate { .. }));

    let accepted = BudgetRequest { accept_over_estimate: true, ..tight };
    let response = orchestrator::submit(&workflow, Some(&accepted), &pricing, 50).unwrap();
    let suggestions = response.suggestions.expect("suggestions generated when over budget");
    assert!(!suggestions.is_empty());
    assert!(matches!(suggestions[0].action, orchestrator::SuggestionAction::Downgrade { .. }));
}
