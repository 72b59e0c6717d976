//! Workflow graph data model.

use crate::error::PlanningError;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

pub type NodeId = String;

/// Upper bound on node count for a single workflow graph, absent an
/// explicit override from config.
pub const DEFAULT_NODE_CAP: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub max_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
    #[serde(default)]
    pub fallback: Option<NodeId>,
    #[serde(default)]
    pub memory_store_key: Option<String>,
    #[serde(default)]
    pub memory_recall_query: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_secs() -> u32 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolConfig {
    pub tool_type: String,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalConfig {
    /// Dot-path into the upstream step output evaluated to pick a branch.
    pub condition: String,
    /// Branch value -> target node id. Iterated in key order at runtime so
    /// evaluation is deterministic regardless of insertion order.
    pub branches: std::collections::BTreeMap<String, NodeId>,
    #[serde(default)]
    pub default_branch: Option<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Agent(AgentConfig),
    Tool(ToolConfig),
    Conditional(ConditionalConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn agent(id: impl Into<NodeId>, config: AgentConfig) -> Self {
        Self { id: id.into(), kind: NodeKind::Agent(config) }
    }

    pub fn tool(id: impl Into<NodeId>, config: ToolConfig) -> Self {
        Self { id: id.into(), kind: NodeKind::Tool(config) }
    }

    pub fn conditional(id: impl Into<NodeId>, config: ConditionalConfig) -> Self {
        Self { id: id.into(), kind: NodeKind::Conditional(config) }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.kind, NodeKind::Conditional(_))
    }

    pub fn is_agent(&self) -> bool {
        matches!(self.kind, NodeKind::Agent(_))
    }

    pub fn fallback(&self) -> Option<&NodeId> {
        match &self.kind {
            NodeKind::Agent(cfg) => cfg.fallback.as_ref(),
            _ => None,
        }
    }

    pub fn max_output_tokens(&self) -> u32 {
        match &self.kind {
            NodeKind::Agent(cfg) => cfg.max_output_tokens,
            _ => 0,
        }
    }

    pub fn agent_config(&self) -> Option<&AgentConfig> {
        match &self.kind {
            NodeKind::Agent(cfg) => Some(cfg),
            _ => None,
        }
    }
}

/// A conditional edge is only traversed when the upstream conditional
/// node's text output matches; plain edges carry no condition. Evaluated
/// in ascending target-id order with `Default` tried only after every
/// non-default edge has been rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    Equals(String),
    Contains(String),
    Default,
}

impl EdgeCondition {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EdgeCondition::Equals(s) => text == s,
            EdgeCondition::Contains(s) => text.contains(s.as_str()),
            EdgeCondition::Default => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub condition: Option<EdgeCondition>,
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self { from: from.into(), to: to.into(), condition: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Structural checks that don't require walking the graph: non-empty,
    /// within the node cap, and every edge/fallback endpoint resolves to a
    /// real node. Cycle detection happens in the Planner, where it falls
    /// out of Kahn's algorithm for free.
    pub fn validate(&self, node_cap: usize) -> Result<(), PlanningError> {
        if self.nodes.is_empty() {
            return Err(PlanningError::EmptyWorkflow);
        }
        if self.nodes.len() > node_cap {
            return Err(PlanningError::TooLarge { count: self.nodes.len(), cap: node_cap });
        }

        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();

        for edge in &self.edges {
            if !ids.contains(edge.from.as_str()) || !ids.contains(edge.to.as_str()) {
                return Err(PlanningError::InvalidEdge { from: edge.from.clone(), to: edge.to.clone() });
            }
        }

        for node in &self.nodes {
            if let Some(fallback) = node.fallback() {
                if !ids.contains(fallback.as_str()) {
                    return Err(PlanningError::InvalidEdge {
                        from: node.id.clone(),
                        to: fallback.clone(),
                    });
                }
                if self.fallback_reaches(fallback.as_str(), node.id.as_str()) {
                    return Err(PlanningError::FallbackCycle { origin: node.id.clone(), fallback: fallback.clone() });
                }
            }
            if let NodeKind::Conditional(cfg) = &node.kind {
                for target in cfg.branches.values().chain(cfg.default_branch.iter()) {
                    if !ids.contains(target.as_str()) {
                        return Err(PlanningError::InvalidEdge {
                            from: node.id.clone(),
                            to: target.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Whether `target` is reachable from `start` by following normal
    /// edges and fallback links forward. Used to reject a fallback whose
    /// own forward reach loops back to the node it's covering for.
    fn fallback_reaches(&self, start: &str, target: &str) -> bool {
        let mut adjacency: std::collections::HashMap<&str, Vec<&str>> = std::collections::HashMap::new();
        for edge in &self.edges {
            adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        }
        for node in &self.nodes {
            if let Some(fb) = node.fallback() {
                adjacency.entry(node.id.as_str()).or_default().push(fb.as_str());
            }
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(start);
        queue.push_back(start);

        while let Some(cur) = queue.pop_front() {
            if cur == target {
                return true;
            }
            if let Some(next) = adjacency.get(cur) {
                for &n in next {
                    if visited.insert(n) {
                        queue.push_back(n);
                    }
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_node(id: &str) -> Node {
        agent_node_with_fallback(id, None)
    }

    fn agent_node_with_fallback(id: &str, fallback: Option<&str>) -> Node {
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
                fallback: fallback.map(|s| s.to_string()),
                memory_store_key: None,
                memory_recall_query: None,
            },
        )
    }

    #[test]
    fn empty_graph_rejected() {
        let g = Graph::new(vec![], vec![]);
        assert_eq!(g.validate(DEFAULT_NODE_CAP), Err(PlanningError::EmptyWorkflow));
    }

    #[test]
    fn oversized_graph_rejected() {
        let nodes: Vec<Node> = (0..5).map(|i| agent_node(&format!("n{i}"))).collect();
        let g = Graph::new(nodes, vec![]);
        assert_eq!(
            g.validate(3),
            Err(PlanningError::TooLarge { count: 5, cap: 3 })
        );
    }

    #[test]
    fn edge_to_unknown_node_rejected() {
        let g = Graph::new(vec![agent_node("a")], vec![Edge::new("a", "missing")]);
        assert!(matches!(g.validate(DEFAULT_NODE_CAP), Err(PlanningError::InvalidEdge { .. })));
    }

    #[test]
    fn direct_fallback_cycle_rejected() {
        let g = Graph::new(
            vec![agent_node_with_fallback("a", Some("b")), agent_node_with_fallback("b", Some("a"))],
            vec![],
        );
        assert!(matches!(g.validate(DEFAULT_NODE_CAP), Err(PlanningError::FallbackCycle { .. })));
    }

    #[test]
    fn fallback_reachable_back_to_origin_via_edges_rejected() {
        let g = Graph::new(
            vec![agent_node_with_fallback("a", Some("b")), agent_node("b"), agent_node("c")],
            vec![Edge::new("b", "c"), Edge::new("c", "a")],
        );
        assert!(matches!(g.validate(DEFAULT_NODE_CAP), Err(PlanningError::FallbackCycle { .. })));
    }

    #[test]
    fn valid_graph_passes() {
        let g = Graph::new(
            vec![agent_node("a"), agent_node("b")],
            vec![Edge::new("a", "b")],
        );
        assert!(g.validate(DEFAULT_NODE_CAP).is_ok());
    }
}
