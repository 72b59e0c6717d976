//! Ephemeral per-execution state.

use crate::graph::NodeId;
use crate::plan::ExecutionPlan;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
    Skipped,
    NotRun,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped | Self::NotRun)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    pub text: String,
    #[serde(default)]
    pub structured: Option<serde_json::Value>,
}

/// Per-node record tracked in `RunState`. A fallback run for node `p` gets
/// its own record keyed by the fallback node's own id, with `is_fallback`
/// set and `fallback_for` pointing back at `p`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub output: Option<StepOutput>,
    pub attempts: u32,
    pub is_fallback: bool,
    pub fallback_for: Option<NodeId>,
    pub tokens_prompt: u32,
    pub tokens_completion: u32,
    pub cost: f64,
    pub parallel_group: usize,
    pub skip_reason: Option<String>,
    pub last_error: Option<String>,
}

impl StepRecord {
    fn pending(node_id: NodeId, parallel_group: usize) -> Self {
        Self {
            node_id,
            status: NodeStatus::Pending,
            output: None,
            attempts: 0,
            is_fallback: false,
            fallback_for: None,
            tokens_prompt: 0,
            tokens_completion: 0,
            cost: 0.0,
            parallel_group,
            skip_reason: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub steps: HashMap<NodeId, StepRecord>,
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub cost: f64,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, plan: &ExecutionPlan) -> Self {
        let mut steps = HashMap::with_capacity(plan.total_steps);
        for group in &plan.groups {
            for planned in &group.nodes {
                steps.insert(planned.node.id.clone(), StepRecord::pending(planned.node.id.clone(), group.index));
            }
        }
        Self { run_id: run_id.into(), steps, tokens_prompt: 0, tokens_completion: 0, cost: 0.0 }
    }

    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.steps.get(node_id).map(|s| s.status)
    }

    pub fn set_status(&mut self, node_id: &str, status: NodeStatus) {
        if let Some(step) = self.steps.get_mut(node_id) {
            step.status = status;
        }
    }

    pub fn record_usage(&mut self, node_id: &str, tokens_prompt: u32, tokens_completion: u32, cost: f64) {
        if let Some(step) = self.steps.get_mut(node_id) {
            step.tokens_prompt += tokens_prompt;
            step.tokens_completion += tokens_completion;
            step.cost += cost;
        }
        self.tokens_prompt += u64::from(tokens_prompt);
        self.tokens_completion += u64::from(tokens_completion);
        self.cost += cost;
    }

    /// Insert a fallback record for `fallback_id`, substituting for `original_id`.
    pub fn register_fallback(&mut self, fallback_id: &str, original_id: &str, parallel_group: usize) {
        let mut record = StepRecord::pending(fallback_id.to_string(), parallel_group);
        record.is_fallback = true;
        record.fallback_for = Some(original_id.to_string());
        self.steps.insert(fallback_id.to_string(), record);
    }

    pub fn all_terminal(&self) -> bool {
        self.steps.values().all(|s| s.status.is_terminal())
    }

    /// Flattened, execution-ordered view matching the persisted step
    /// execution schema. An external persistence layer can serialize this
    /// directly.
    pub fn step_execution_records(&self) -> Vec<&StepRecord> {
        let mut records: Vec<&StepRecord> = self.steps.values().collect();
        records.sort_by(|a, b| (a.parallel_group, &a.node_id).cmp(&(b.parallel_group, &b.node_id)));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AgentConfig, Edge, Graph, Node};
    use crate::plan::plan;

    fn agent(id: &str) -> Node {
        Node::agent(
            id,
            AgentConfig {
                provider: "anthropic".into(),
                model: "claude-3-haiku".into(),
                system_prompt: "do the thing".into(),
                temperature: 0.7,
                max_output_tokens: 256,
                max_retries: 2,
                timeout_secs: 30,
                fallback: None,
                memory_store_key: None,
                memory_recall_query: None,
            },
        )
    }

    #[test]
    fn new_run_state_has_all_nodes_pending() {
        let graph = Graph::new(vec![agent("a"), agent("b")], vec![Edge::new("a", "b")]);
        let p = plan(&graph, 50).unwrap();
        let run = RunState::new("run-1", &p);
        assert_eq!(run.steps.len(), 2);
        assert_eq!(run.status_of("a"), Some(NodeStatus::Pending));
    }

    #[test]
    fn fallback_record_is_distinct_from_original() {
        let graph = Graph::new(vec![agent("a"), agent("a-fallback")], vec![]);
        let p = plan(&graph, 50).unwrap();
        let mut run = RunState::new("run-1", &p);
        run.register_fallback("a-fallback", "a", 0);
        let fb = &run.steps["a-fallback"];
        assert!(fb.is_fallback);
        assert_eq!(fb.fallback_for.as_deref(), Some("a"));
    }

    #[test]
    fn usage_accumulates_at_node_and_run_level() {
        let graph = Graph::new(vec![agent("a")], vec![]);
        let p = plan(&graph, 50).unwrap();
        let mut run = RunState::new("run-1", &p);
        run.record_usage("a", 10, 20, 0.05);
        assert_eq!(run.steps["a"].tokens_prompt, 10);
        assert_eq!(run.steps["a"].tokens_completion, 20);
        assert_eq!(run.tokens_completion, 20);
        assert!((run.cost - 0.05).abs() < f64::EPSILON);
    }
}
