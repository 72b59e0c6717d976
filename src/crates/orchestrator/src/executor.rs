//! Drives an [`ExecutionPlan`] group by group: dispatches agent steps
//! through the Backtracker, evaluates conditional branches, and applies
//! every terminal outcome back to `RunState` on the single driver task.

use crate::backoff::RetryConfig;
use crate::backtracker::{self, StepOutcome};
use crate::budget::Enforcer;
use crate::events::{Event, Publisher, RunStatus, RunTotals, Tokens};
use chrono::Utc;
use llm::AdapterRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use workflow_core::{
    BudgetCheck, EdgeCondition, ExecutionPlan, Node, NodeId, NodeStatus, PlannedNode, RunState, StepOutput,
};

#[derive(Debug, Clone, Default)]
pub struct DependencyOutput {
    pub agent_name: String,
    pub text: String,
    pub structured: Option<serde_json::Value>,
}

/// Inputs available to a step at dispatch time: its resolved dependency
/// outputs plus the original user input, present only for root nodes.
#[derive(Debug, Clone, Default)]
pub struct StepInput {
    pub dependencies: HashMap<NodeId, DependencyOutput>,
    pub root_input: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub run_state: RunState,
    pub totals: RunTotals,
}

pub struct Executor {
    registry: Arc<dyn AdapterRegistry>,
    publisher: Arc<dyn Publisher>,
    retry_config: RetryConfig,
}

impl Executor {
    pub fn new(registry: Arc<dyn AdapterRegistry>, publisher: Arc<dyn Publisher>) -> Self {
        Self { registry, publisher, retry_config: RetryConfig::default() }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        user_input: Option<String>,
        enforcer: &Enforcer,
        cancel: CancellationToken,
        run_id: impl Into<String>,
    ) -> RunOutcome {
        let run_id = run_id.into();
        info!(run_id, total_steps = plan.total_steps, max_parallelism = plan.max_parallelism, "run started");
        let started = Instant::now();
        let mut run_state = RunState::new(run_id.clone(), plan);

        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut dependencies: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for group in &plan.groups {
            for pn in &group.nodes {
                dependencies.insert(pn.node.id.clone(), pn.dependencies.clone());
                dependents.entry(pn.node.id.clone()).or_default();
                for dep in &pn.dependencies {
                    dependents.entry(dep.clone()).or_default().push(pn.node.id.clone());
                }
            }
        }

        self.publisher
            .publish(
                &run_id,
                Event::ExecutionStarted {
                    timestamp: Utc::now(),
                    run_id: run_id.clone(),
                    total_steps: plan.total_steps,
                    max_parallelism: plan.max_parallelism,
                    estimated_rounds: plan.estimated_rounds,
                },
            )
            .await;

        let mut halted = false;
        let mut was_cancelled = false;

        for group in &plan.groups {
            if cancel.is_cancelled() {
                info!(run_id, group = group.index, "run cancelled before group dispatch");
                was_cancelled = true;
                break;
            }
            if enforcer.is_halted() {
                info!(run_id, group = group.index, "run halted by budget before group dispatch");
                halted = true;
                break;
            }

            debug!(run_id, group = group.index, size = group.nodes.len(), "dispatching group");

            let pending_in_group: Vec<&PlannedNode> =
                group.nodes.iter().filter(|pn| run_state.status_of(&pn.node.id) == Some(NodeStatus::Pending)).collect();

            let mut agent_nodes = Vec::new();
            for pn in pending_in_group {
                if pn.node.is_conditional() {
                    self.resolve_conditional(pn, plan, &mut run_state, &dependents, &dependencies).await;
                } else if !pn.node.is_agent() {
                    run_state.set_status(&pn.node.id, NodeStatus::Completed);
                    if let Some(step) = run_state.steps.get_mut(&pn.node.id) {
                        step.output = Some(StepOutput { text: String::new(), structured: None });
                    }
                } else {
                    agent_nodes.push(pn);
                }
            }

            if agent_nodes.is_empty() {
                continue;
            }

            for pn in &agent_nodes {
                self.publisher
                    .publish(
                        &run_id,
                        Event::AgentStarted {
                            timestamp: Utc::now(),
                            agent_id: pn.node.id.clone(),
                            agent_name: pn.node.id.clone(),
                            parallel_group: group.index,
                        },
                    )
                    .await;
            }

            let mut handles = Vec::with_capacity(agent_nodes.len());
            for pn in &agent_nodes {
                let node = pn.node.clone();
                let fallback_node = node.fallback().and_then(|fid| plan.node(fid)).map(|fb| fb.node.clone());
                let fallback_group = node.fallback().and_then(|fid| plan.group_of(fid));
                let input = build_step_input(&node, &dependencies, &run_state, user_input.as_deref());
                let retry_config = self.retry_config.clone();
                let registry = self.registry.clone();
                let publisher = self.publisher.clone();
                let cancel = cancel.clone();
                let run_id_task = run_id.clone();
                handles.push(tokio::spawn(async move {
                    let outcome = backtracker::execute(
                        &node,
                        fallback_node.as_ref(),
                        fallback_group,
                        &input,
                        &retry_config,
                        &cancel,
                        registry.as_ref(),
                        publisher.as_ref(),
                        &run_id_task,
                    )
                    .await;
                    (node.id, outcome)
                }));
            }

            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                if let Ok(pair) = handle.await {
                    results.push(pair);
                }
            }
            results.sort_by(|a, b| a.0.cmp(&b.0));

            for (node_id, outcome) in results {
                self.apply_outcome(&run_id, &node_id, outcome, group.index, plan, &mut run_state, enforcer, &dependents, &dependencies).await;
            }

            if enforcer.is_halted() {
                info!(run_id, group = group.index, "run halted by budget after group dispatch");
                halted = true;
                break;
            }
        }

        let agents_not_run: Vec<String> = run_state
            .steps
            .values()
            .filter(|s| matches!(s.status, NodeStatus::Pending | NodeStatus::Running | NodeStatus::Retrying))
            .map(|s| s.node_id.clone())
            .collect();
        for id in &agents_not_run {
            run_state.set_status(id, NodeStatus::NotRun);
        }

        let status = if halted {
            let snapshot = enforcer.snapshot();
            self.publisher
                .publish(
                    &run_id,
                    Event::BudgetExceeded {
                        timestamp: Utc::now(),
                        consumed: snapshot.used_cost,
                        budget: snapshot.max_cost.unwrap_or(0.0),
                        agents_not_run: agents_not_run.clone(),
                    },
                )
                .await;
            RunStatus::BudgetExceeded
        } else if was_cancelled {
            RunStatus::Cancelled
        } else {
            let hard_failures = run_state
                .steps
                .values()
                .filter(|s| {
                    s.status == NodeStatus::Failed
                        && !run_state.steps.values().any(|o| o.fallback_for.as_deref() == Some(s.node_id.as_str()) && o.status == NodeStatus::Completed)
                })
                .count();
            let skipped = run_state.steps.values().filter(|s| s.status == NodeStatus::Skipped).count();
            if hard_failures > 0 {
                RunStatus::Failed
            } else if skipped > 0 {
                RunStatus::CompletedWithSkips
            } else {
                RunStatus::Completed
            }
        };

        let totals = RunTotals {
            tokens_prompt: run_state.tokens_prompt,
            tokens_completion: run_state.tokens_completion,
            cost: run_state.cost,
            duration_ms: started.elapsed().as_millis() as u64,
            agents_completed: run_state.steps.values().filter(|s| s.status == NodeStatus::Completed).count() as u32,
            agents_failed: run_state.steps.values().filter(|s| s.status == NodeStatus::Failed).count() as u32,
            agents_skipped: run_state.steps.values().filter(|s| s.status == NodeStatus::Skipped).count() as u32,
            dropped_events: self.publisher.dropped_count(&run_id),
        };

        info!(run_id, ?status, duration_ms = totals.duration_ms, cost = totals.cost, "run completed");
        self.publisher.publish(&run_id, Event::ExecutionCompleted { timestamp: Utc::now(), status, totals: totals.clone() }).await;
        self.publisher.close(&run_id);

        RunOutcome { run_id, status, run_state, totals }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_outcome(
        &self,
        run_id: &str,
        node_id: &NodeId,
        outcome: StepOutcome,
        group_index: usize,
        plan: &ExecutionPlan,
        run_state: &mut RunState,
        enforcer: &Enforcer,
        dependents: &HashMap<NodeId, Vec<NodeId>>,
        dependencies: &HashMap<NodeId, Vec<NodeId>>,
    ) {
        match outcome {
            StepOutcome::Completed { output, tokens_prompt, tokens_completion, cost, attempts, latency_ms } => {
                debug!(run_id, agent_id = %node_id, attempts, cost, "step outcome: completed");
                run_state.set_status(node_id, NodeStatus::Completed);
                run_state.record_usage(node_id, tokens_prompt, tokens_completion, cost);
                if let Some(step) = run_state.steps.get_mut(node_id) {
                    step.attempts = attempts;
                    step.output = Some(StepOutput { text: output.text, structured: None });
                }
                self.publisher
                    .publish(
                        run_id,
                        Event::AgentCompleted {
                            timestamp: Utc::now(),
                            agent_id: node_id.clone(),
                            tokens: Tokens { prompt: tokens_prompt, completion: tokens_completion },
                            cost,
                            latency_ms,
                        },
                    )
                    .await;
                self.check_budget(run_id, enforcer, tokens_prompt, tokens_completion, cost).await;
            }
            StepOutcome::FailedWithFallback { original_attempts, fallback_id, fallback_outcome } => {
                debug!(run_id, agent_id = %node_id, fallback_id = %fallback_id, original_attempts, "step outcome: failed with fallback");
                run_state.set_status(node_id, NodeStatus::Failed);
                if let Some(step) = run_state.steps.get_mut(node_id) {
                    step.attempts = original_attempts;
                }
                let fallback_group = plan.group_of(&fallback_id).unwrap_or(group_index);
                run_state.register_fallback(&fallback_id, node_id, fallback_group);

                match *fallback_outcome {
                    StepOutcome::Completed { output, tokens_prompt, tokens_completion, cost, attempts, latency_ms } => {
                        run_state.set_status(&fallback_id, NodeStatus::Completed);
                        run_state.record_usage(&fallback_id, tokens_prompt, tokens_completion, cost);
                        if let Some(step) = run_state.steps.get_mut(&fallback_id) {
                            step.attempts = attempts;
                            step.output = Some(StepOutput { text: output.text, structured: None });
                        }
                        self.publisher
                            .publish(
                                run_id,
                                Event::AgentCompleted {
                                    timestamp: Utc::now(),
                                    agent_id: fallback_id.clone(),
                                    tokens: Tokens { prompt: tokens_prompt, completion: tokens_completion },
                                    cost,
                                    latency_ms,
                                },
                            )
                            .await;
                        self.check_budget(run_id, enforcer, tokens_prompt, tokens_completion, cost).await;
                    }
                    StepOutcome::Failed { kind: _, message, attempts } => {
                        run_state.set_status(&fallback_id, NodeStatus::Failed);
                        if let Some(step) = run_state.steps.get_mut(&fallback_id) {
                            step.attempts = attempts;
                            step.last_error = Some(message);
                        }
                        backtracker::propagate_skips(dependents, dependencies, run_state, node_id, "dependency_failed");
                    }
                    StepOutcome::Cancelled => {
                        run_state.set_status(&fallback_id, NodeStatus::NotRun);
                        backtracker::propagate_skips(dependents, dependencies, run_state, node_id, "cancelled");
                    }
                    StepOutcome::FailedWithFallback { .. } => unreachable!("fallbacks never chain"),
                }
            }
            StepOutcome::Failed { kind: _, message, attempts } => {
                warn!(run_id, agent_id = %node_id, attempts, error = %message, "step outcome: failed terminally");
                run_state.set_status(node_id, NodeStatus::Failed);
                if let Some(step) = run_state.steps.get_mut(node_id) {
                    step.attempts = attempts;
                    step.last_error = Some(message);
                }
                backtracker::propagate_skips(dependents, dependencies, run_state, node_id, "dependency_failed");
            }
            StepOutcome::Cancelled => {
                info!(run_id, agent_id = %node_id, "step outcome: cancelled");
                run_state.set_status(node_id, NodeStatus::NotRun);
                backtracker::propagate_skips(dependents, dependencies, run_state, node_id, "cancelled");
            }
        }
    }

    async fn check_budget(&self, run_id: &str, enforcer: &Enforcer, tokens_prompt: u32, tokens_completion: u32, cost: f64) {
        match enforcer.record_and_check(u64::from(tokens_prompt) + u64::from(tokens_completion), cost) {
            BudgetCheck::Warning => {
                let snapshot = enforcer.snapshot();
                let budget = snapshot.max_cost.unwrap_or(0.0);
                warn!(run_id, used_cost = snapshot.used_cost, budget, "budget warning threshold crossed");
                self.publisher
                    .publish(
                        run_id,
                        Event::BudgetWarning {
                            timestamp: Utc::now(),
                            consumed: snapshot.used_cost,
                            budget,
                            percentage: if budget > 0.0 { snapshot.used_cost / budget * 100.0 } else { 0.0 },
                        },
                    )
                    .await;
            }
            BudgetCheck::Exceeded => {
                warn!(run_id, "budget exceeded, halting run");
                enforcer.halt();
            }
            BudgetCheck::Ok => {}
        }
    }

    /// Evaluate a conditional node's outgoing edges against its upstream
    /// dependency output and skip the branches not taken. Non-default
    /// edges are evaluated first in ascending target-id order, `Default`
    /// last.
    async fn resolve_conditional(
        &self,
        pn: &PlannedNode,
        plan: &ExecutionPlan,
        run_state: &mut RunState,
        dependents: &HashMap<NodeId, Vec<NodeId>>,
        dependencies: &HashMap<NodeId, Vec<NodeId>>,
    ) {
        let node_id = &pn.node.id;
        let decision_text = decision_text_for(pn, run_state);

        let ordered = plan.outgoing_edges(node_id);
        let mut ranked: Vec<&workflow_core::Edge> = Vec::with_capacity(ordered.len());
        ranked.extend(ordered.iter().filter(|e| !matches!(e.condition, None | Some(EdgeCondition::Default))).copied());
        ranked.extend(ordered.iter().filter(|e| matches!(e.condition, None | Some(EdgeCondition::Default))).copied());

        let matched_target = ranked
            .iter()
            .find(|e| e.condition.as_ref().map(|c| c.matches(&decision_text)).unwrap_or(true))
            .map(|e| e.to.clone());

        debug!(agent_id = %node_id, matched = ?matched_target, "conditional resolved");
        run_state.set_status(node_id, NodeStatus::Completed);
        if let Some(step) = run_state.steps.get_mut(node_id) {
            step.output = Some(StepOutput { text: decision_text, structured: None });
        }

        for edge in &ranked {
            if Some(&edge.to) != matched_target.as_ref() && run_state.status_of(&edge.to) == Some(NodeStatus::Pending) {
                run_state.set_status(&edge.to, NodeStatus::Skipped);
                if let Some(step) = run_state.steps.get_mut(&edge.to) {
                    step.skip_reason = Some("condition_not_met".to_string());
                }
                backtracker::propagate_skips(dependents, dependencies, run_state, &edge.to, "condition_not_met");
            }
        }
    }
}

fn decision_text_for(pn: &PlannedNode, run_state: &RunState) -> String {
    let mut deps: Vec<&NodeId> = pn.dependencies.iter().collect();
    deps.sort();
    deps.iter().filter_map(|d| resolved_output(run_state, d)).map(|o| o.text.clone()).collect::<Vec<_>>().join("\n")
}

/// A dependency's output if it completed directly, or its completed
/// fallback's output if the original terminally failed. A fallback
/// substitutes for its original from downstream's perspective.
fn resolved_output<'a>(run_state: &'a RunState, dep_id: &str) -> Option<&'a StepOutput> {
    if let Some(step) = run_state.steps.get(dep_id) {
        if step.status == NodeStatus::Completed {
            return step.output.as_ref();
        }
    }
    run_state
        .steps
        .values()
        .find(|s| s.fallback_for.as_deref() == Some(dep_id) && s.status == NodeStatus::Completed)
        .and_then(|s| s.output.as_ref())
}

fn build_step_input(node: &Node, dependencies: &HashMap<NodeId, Vec<NodeId>>, run_state: &RunState, user_input: Option<&str>) -> StepInput {
    let deps = dependencies.get(&node.id).cloned().unwrap_or_default();
    let mut dependency_outputs = HashMap::with_capacity(deps.len());
    for dep_id in &deps {
        if let Some(output) = resolved_output(run_state, dep_id) {
            dependency_outputs.insert(
                dep_id.clone(),
                DependencyOutput { agent_name: dep_id.clone(), text: output.text.clone(), structured: output.structured.clone() },
            );
        }
    }
    let root_input = if deps.is_empty() { user_input.map(|s| s.to_string()) } else { None };
    StepInput { dependencies: dependency_outputs, root_input }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BroadcastPublisher;
    use llm::testing::ScriptedAdapter;
    use llm::StaticAdapterRegistry;
    use workflow_core::{plan, AgentConfig, Edge, Graph};

    fn agent(id: &str) -> Node {
        Node::agent(
            id,
            AgentConfig {
                provider: "anthropic".into(),
                model: "claude-3-haiku".into(),
                system_prompt: "x".into(),
                temperature: 0.7,
                max_output_tokens: 100,
                max_retries: 1,
                timeout_secs: 10,
                fallback: None,
                memory_store_key: None,
                memory_recall_query: None,
            },
        )
    }

    #[tokio::test]
    async fn diamond_run_completes_and_threads_dependency_text() {
        let graph = Graph::new(
            vec![agent("a"), agent("b"), agent("c"), agent("d")],
            vec![Edge::new("a", "b"), Edge::new("a", "c"), Edge::new("b", "d"), Edge::new("c", "d")],
        );
        let planned = plan(&graph, 50).unwrap();

        let mut registry = StaticAdapterRegistry::new();
        registry.register(Arc::new(ScriptedAdapter::always_succeed("anthropic", "claude-3-haiku", "ok")));

        let executor = Executor::new(Arc::new(registry), Arc::new(BroadcastPublisher::default()));
        let enforcer = Enforcer::unbounded();
        let outcome = executor.run(&planned, Some("hello".into()), &enforcer, CancellationToken::new(), "run-1").await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.totals.agents_completed, 4);
        assert_eq!(outcome.run_state.status_of("d"), Some(NodeStatus::Completed));
    }

    #[test]
    fn downstream_input_pulls_fallback_output_when_original_failed() {
        let graph = Graph::new(
            vec![agent("a"), agent("a-fallback"), agent("c")],
            vec![Edge::new("a", "c")],
        );
        let planned = plan(&graph, 50).unwrap();
        let mut run_state = RunState::new("run-x", &planned);
        let dependencies: HashMap<NodeId, Vec<NodeId>> = HashMap::from([("c".to_string(), vec!["a".to_string()])]);

        run_state.set_status("a", NodeStatus::Failed);
        run_state.register_fallback("a-fallback", "a", 0);
        run_state.set_status("a-fallback", NodeStatus::Completed);
        if let Some(step) = run_state.steps.get_mut("a-fallback") {
            step.output = Some(StepOutput { text: "recovered".into(), structured: None });
        }

        let c_node = &planned.node("c").unwrap().node;
        let input = build_step_input(c_node, &dependencies, &run_state, None);
        assert_eq!(input.dependencies["a"].text, "recovered");
    }

    #[tokio::test]
    async fn budget_halt_marks_remaining_nodes_not_run() {
        let graph = Graph::new(vec![agent("a"), agent("b")], vec![Edge::new("a", "b")]);
        let planned = plan(&graph, 50).unwrap();

        let mut registry = StaticAdapterRegistry::new();
        registry.register(Arc::new(ScriptedAdapter::always_succeed("anthropic", "claude-3-haiku", "ok")));

        let executor = Executor::new(Arc::new(registry), Arc::new(BroadcastPublisher::default()));
        let enforcer = Enforcer::new(None, Some(0.0005));
        let outcome = executor.run(&planned, None, &enforcer, CancellationToken::new(), "run-2").await;

        assert_eq!(outcome.status, RunStatus::BudgetExceeded);
        assert_eq!(outcome.run_state.status_of("b"), Some(NodeStatus::NotRun));
    }
}
