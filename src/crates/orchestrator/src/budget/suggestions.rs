//! Ranked, cost-reducing plan suggestions.

use crate::budget::estimator::CostEstimate;
use llm::PricingTable;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use workflow_core::{ExecutionPlan, NodeId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SuggestionAction {
    Downgrade { to_model: String },
    SkipAgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub node_id: NodeId,
    pub action: SuggestionAction,
    pub savings: f64,
    pub cumulative_savings: f64,
    pub would_fit_budget: bool,
}

/// Rank downgrade and skip-agent candidates by descending savings and
/// compute a running `would_fit_budget` flag. Empty when the estimate is
/// already within `max_cost`.
pub fn suggest(plan: &ExecutionPlan, estimate: &CostEstimate, pricing: &PricingTable, max_cost: f64) -> Vec<Suggestion> {
    if estimate.total_cost <= max_cost {
        return Vec::new();
    }

    let optional = optional_node_ids(plan);

    struct Candidate {
        node_id: NodeId,
        action: SuggestionAction,
        savings: f64,
    }

    let mut candidates = Vec::new();

    for step in &estimate.steps {
        let ladder = pricing.downgrade_ladder(&step.provider, &step.model);
        if let Some(next_model) = ladder.first() {
            if let Some(price) = pricing.price(&step.provider, next_model) {
                let downgraded_cost = price.cost(step.prompt_tokens, step.completion_tokens);
                let savings = step.cost - downgraded_cost;
                if savings > 0.0 {
                    candidates.push(Candidate {
                        node_id: step.node_id.clone(),
                        action: SuggestionAction::Downgrade { to_model: next_model.clone() },
                        savings,
                    });
                }
            }
        }

        if optional.contains(&step.node_id) && step.cost > 0.0 {
            candidates.push(Candidate { node_id: step.node_id.clone(), action: SuggestionAction::SkipAgent, savings: step.cost });
        }
    }

    candidates.sort_by(|a, b| b.savings.partial_cmp(&a.savings).unwrap_or(std::cmp::Ordering::Equal));

    debug!(
        over_budget_by = estimate.total_cost - max_cost,
        candidates = candidates.len(),
        "generating budget suggestions"
    );

    let mut cumulative = 0.0;
    candidates
        .into_iter()
        .map(|c| {
            cumulative += c.savings;
            Suggestion {
                node_id: c.node_id,
                action: c.action,
                savings: c.savings,
                cumulative_savings: cumulative,
                would_fit_budget: (estimate.total_cost - cumulative) <= max_cost,
            }
        })
        .collect()
}

/// A node is optional if every leaf reachable from it has at least one
/// alternative, completed-dependency-only ancestor path that does not
/// route through the node.
fn optional_node_ids(plan: &ExecutionPlan) -> HashSet<NodeId> {
    let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut dependencies: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut all_ids: Vec<NodeId> = Vec::new();

    for group in &plan.groups {
        for pn in &group.nodes {
            all_ids.push(pn.node.id.clone());
            dependencies.insert(pn.node.id.clone(), pn.dependencies.clone());
            dependents.entry(pn.node.id.clone()).or_default();
            for dep in &pn.dependencies {
                dependents.entry(dep.clone()).or_default().push(pn.node.id.clone());
            }
        }
    }

    let leaves: HashSet<NodeId> =
        all_ids.iter().filter(|id| dependents.get(*id).map_or(true, |v| v.is_empty())).cloned().collect();
    let roots: Vec<NodeId> =
        all_ids.iter().filter(|id| dependencies.get(*id).map_or(true, |v| v.is_empty())).cloned().collect();

    let mut optional = HashSet::new();
    for id in &all_ids {
        let reachable_leaves = downstream_leaves(id, &dependents, &leaves);
        let all_have_alternative = if reachable_leaves.is_empty() {
            true
        } else {
            reachable_leaves.iter().all(|leaf| roots.iter().any(|root| can_reach_avoiding(root, leaf, id, &dependents)))
        };
        if all_have_alternative {
            optional.insert(id.clone());
        }
    }
    optional
}

fn downstream_leaves(node: &NodeId, dependents: &HashMap<NodeId, Vec<NodeId>>, leaves: &HashSet<NodeId>) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut stack = vec![node.clone()];
    let mut result = HashSet::new();
    if leaves.contains(node) {
        result.insert(node.clone());
    }
    while let Some(cur) = stack.pop() {
        if !visited.insert(cur.clone()) {
            continue;
        }
        if let Some(children) = dependents.get(&cur) {
            for child in children {
                if leaves.contains(child) {
                    result.insert(child.clone());
                }
                stack.push(child.clone());
            }
        }
    }
    result
}

fn can_reach_avoiding(root: &NodeId, target: &NodeId, avoid: &NodeId, dependents: &HashMap<NodeId, Vec<NodeId>>) -> bool {
    if root == avoid {
        return false;
    }
    let mut visited = HashSet::new();
    let mut stack = vec![root.clone()];
    while let Some(cur) = stack.pop() {
        if cur == *target {
            return true;
        }
        if !visited.insert(cur.clone()) {
            continue;
        }
        if let Some(children) = dependents.get(&cur) {
            for child in children {
                if child != avoid {
                    stack.push(child.clone());
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::estimator::estimate;
    use workflow_core::{plan, AgentConfig, Edge, Graph, Node};

    fn agent(id: &str, provider: &str, model: &str, max_tokens: u32) -> Node {
        Node::agent(
            id,
            AgentConfig {
                provider: provider.into(),
                model: model.into(),
                system_prompt: "do work".into(),
                temperature: 0.7,
                max_output_tokens: max_tokens,
                max_retries: 1,
                timeout_secs: 30,
                fallback: None,
                memory_store_key: None,
                memory_recall_query: None,
            },
        )
    }

    #[test]
    fn no_suggestions_within_budget() {
        let graph = Graph::new(vec![agent("a", "anthropic", "claude-3-haiku", 100)], vec![]);
        let planned = plan(&graph, 50).unwrap();
        let pricing = PricingTable::with_defaults();
        let est = estimate(&planned, &pricing);
        let suggestions = suggest(&planned, &est, &pricing, 1000.0);
        assert!(suggestions.is_empty());
    }

    #[test]
    fn downgrade_suggested_when_over_budget() {
        let graph = Graph::new(vec![agent("a", "anthropic", "claude-3-opus", 1000)], vec![]);
        let planned = plan(&graph, 50).unwrap();
        let pricing = PricingTable::with_defaults();
        let est = estimate(&planned, &pricing);
        let suggestions = suggest(&planned, &est, &pricing, 0.001);
        assert!(!suggestions.is_empty());
        assert!(matches!(suggestions[0].action, SuggestionAction::Downgrade { .. }));
    }

    #[test]
    fn independent_sibling_with_no_downstream_is_optional() {
        let graph = Graph::new(
            vec![agent("a", "anthropic", "claude-3-opus", 500), agent("b", "anthropic", "claude-3-opus", 500)],
            vec![],
        );
        let planned = plan(&graph, 50).unwrap();
        let optional = optional_node_ids(&planned);
        assert!(optional.contains("a"));
        assert!(optional.contains("b"));
    }

    #[test]
    fn sole_path_to_a_leaf_is_not_optional() {
        let graph = Graph::new(
            vec![agent("a", "anthropic", "claude-3-opus", 500), agent("b", "anthropic", "claude-3-opus", 500)],
            vec![Edge::new("a", "b")],
        );
        let planned = plan(&graph, 50).unwrap();
        let optional = optional_node_ids(&planned);
        assert!(!optional.contains("a"));
    }
}
