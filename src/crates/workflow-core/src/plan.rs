//! DAG planning: validation, topological ordering, and ASAP parallel
//! group assignment.
//!
//! Grouping follows `group(n) = 0` for a root and
//! `group(n) = 1 + max(group(dep) for dep in deps(n))` otherwise, which is
//! the standard longest-path-from-a-root scheduling used to get the
//! earliest possible parallel group for every node. Ties within a group are
//! broken by ascending node id so the same graph always produces
//! byte-identical plan JSON.

use crate::error::PlanningError;
use crate::graph::{Edge, Graph, Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedNode {
    pub node: Node,
    /// Ids of nodes whose output this node may depend on, sorted ascending.
    pub dependencies: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub index: usize,
    /// Nodes in this group, sorted by id. No two nodes in the same group
    /// have a dependency relationship; the Executor may dispatch them
    /// concurrently.
    pub nodes: Vec<PlannedNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    pub groups: Vec<Group>,
    /// Carried verbatim from the source graph so the plan is self-contained
    /// for conditional branch evaluation and for persistence/diffing.
    pub edges: Vec<Edge>,
    pub total_steps: usize,
    pub max_parallelism: usize,
    pub estimated_rounds: usize,
}

impl ExecutionPlan {
    pub fn node(&self, id: &str) -> Option<&PlannedNode> {
        self.groups.iter().flat_map(|g| &g.nodes).find(|pn| pn.node.id == id)
    }

    pub fn group_of(&self, id: &str) -> Option<usize> {
        self.groups
            .iter()
            .find(|g| g.nodes.iter().any(|pn| pn.node.id == id))
            .map(|g| g.index)
    }

    /// Outgoing edges from `id`, sorted by target id ascending. Conditional
    /// branches are evaluated in that order.
    pub fn outgoing_edges(&self, id: &str) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.iter().filter(|e| e.from == id).collect();
        edges.sort_by(|a, b| a.to.cmp(&b.to));
        edges
    }
}

/// Validate `graph` and build its `ExecutionPlan`.
pub fn plan(graph: &Graph, node_cap: usize) -> Result<ExecutionPlan, PlanningError> {
    graph.validate(node_cap)?;

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut dependencies: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &graph.nodes {
        in_degree.insert(node.id.as_str(), 0);
        dependents.entry(node.id.as_str()).or_default();
        dependencies.entry(node.id.as_str()).or_default();
    }
    for edge in &graph.edges {
        dependents.get_mut(edge.from.as_str()).unwrap().push(edge.to.as_str());
        dependencies.get_mut(edge.to.as_str()).unwrap().push(edge.from.as_str());
        *in_degree.get_mut(edge.to.as_str()).unwrap() += 1;
    }

    let mut initial: Vec<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();
    initial.sort_unstable();
    let mut queue: VecDeque<&str> = initial.into_iter().collect();

    let mut local_in_degree = in_degree.clone();
    let mut topo_order: Vec<&str> = Vec::with_capacity(graph.nodes.len());

    while let Some(id) = queue.pop_front() {
        topo_order.push(id);
        let mut newly_zero = Vec::new();
        for &dep in &dependents[id] {
            let d = local_in_degree.get_mut(dep).unwrap();
            *d -= 1;
            if *d == 0 {
                newly_zero.push(dep);
            }
        }
        newly_zero.sort_unstable();
        for n in newly_zero {
            queue.push_back(n);
        }
    }

    if topo_order.len() < graph.nodes.len() {
        let processed: HashSet<&str> = topo_order.iter().copied().collect();
        let mut cycle: Vec<NodeId> = graph
            .nodes
            .iter()
            .map(|n| n.id.clone())
            .filter(|id| !processed.contains(id.as_str()))
            .collect();
        cycle.sort();
        return Err(PlanningError::CircularDependency { cycle });
    }

    let mut group_of: HashMap<&str, usize> = HashMap::with_capacity(topo_order.len());
    for &id in &topo_order {
        let deps = &dependencies[id];
        let g = if deps.is_empty() {
            0
        } else {
            1 + deps.iter().map(|d| group_of[d]).max().unwrap()
        };
        group_of.insert(id, g);
    }

    let max_group = group_of.values().copied().max().unwrap_or(0);
    let mut buckets: Vec<Vec<&str>> = vec![Vec::new(); max_group + 1];
    for (&id, &g) in &group_of {
        buckets[g].push(id);
    }
    for bucket in buckets.iter_mut() {
        bucket.sort_unstable();
    }

    let node_by_id: HashMap<&str, &Node> = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let groups: Vec<Group> = buckets
        .into_iter()
        .enumerate()
        .map(|(index, ids)| {
            let nodes = ids
                .into_iter()
                .map(|id| {
                    let mut deps: Vec<NodeId> = dependencies[id].iter().map(|d| d.to_string()).collect();
                    deps.sort();
                    PlannedNode { node: node_by_id[id].clone(), dependencies: deps }
                })
                .collect();
            Group { index, nodes }
        })
        .collect();

    let total_steps = graph.nodes.len();
    let max_parallelism = groups.iter().map(|g| g.nodes.len()).max().unwrap_or(0);
    let estimated_rounds = groups.len();

    let mut edges = graph.edges.clone();
    edges.sort_by(|a, b| (a.from.as_str(), a.to.as_str()).cmp(&(b.from.as_str(), b.to.as_str())));

    Ok(ExecutionPlan { groups, edges, total_steps, max_parallelism, estimated_rounds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AgentConfig, Edge};

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
    fn diamond_graph_has_three_groups() {
        let graph = Graph::new(
            vec![agent("a"), agent("b"), agent("c"), agent("d")],
            vec![
                Edge::new("a", "b"),
                Edge::new("a", "c"),
                Edge::new("b", "d"),
                Edge::new("c", "d"),
            ],
        );
        let p = plan(&graph, 50).unwrap();
        assert_eq!(p.estimated_rounds, 3);
        assert_eq!(p.groups[0].nodes.iter().map(|n| n.node.id.clone()).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(
            p.groups[1].nodes.iter().map(|n| n.node.id.clone()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
        assert_eq!(p.groups[2].nodes.iter().map(|n| n.node.id.clone()).collect::<Vec<_>>(), vec!["d"]);
        assert_eq!(p.max_parallelism, 2);
        assert_eq!(p.total_steps, 4);
    }

    #[test]
    fn cycle_is_rejected() {
        let graph = Graph::new(
            vec![agent("a"), agent("b")],
            vec![Edge::new("a", "b"), Edge::new("b", "a")],
        );
        let err = plan(&graph, 50).unwrap_err();
        assert!(matches!(err, PlanningError::CircularDependency { .. }));
    }

    #[test]
    fn independent_nodes_share_group_zero() {
        let graph = Graph::new(vec![agent("a"), agent("b")], vec![]);
        let p = plan(&graph, 50).unwrap();
        assert_eq!(p.estimated_rounds, 1);
        assert_eq!(p.groups[0].nodes.len(), 2);
    }

    #[test]
    fn plan_is_deterministic_across_node_order() {
        let g1 = Graph::new(
            vec![agent("z"), agent("a"), agent("m")],
            vec![Edge::new("a", "m"), Edge::new("a", "z")],
        );
        let g2 = Graph::new(
            vec![agent("m"), agent("z"), agent("a")],
            vec![Edge::new("a", "z"), Edge::new("a", "m")],
        );
        assert_eq!(plan(&g1, 50).unwrap(), plan(&g2, 50).unwrap());
    }

    proptest::proptest! {
        /// Any permutation of the same node set and edge set must produce a
        /// byte-identical plan: group assignment and within-group ordering
        /// depend only on node ids and edges, never on input order.
        #[test]
        fn plan_is_deterministic_under_arbitrary_node_permutation(keys in proptest::collection::vec(0u32..1000, 6)) {
            let base_ids = ["a", "b", "c", "d", "e", "f"];
            let edges = vec![
                Edge::new("a", "c"),
                Edge::new("a", "d"),
                Edge::new("b", "d"),
                Edge::new("c", "e"),
                Edge::new("d", "e"),
                Edge::new("e", "f"),
            ];

            let mut order: Vec<usize> = (0..base_ids.len()).collect();
            order.sort_by_key(|&i| keys[i]);
            let shuffled_nodes: Vec<Node> = order.iter().map(|&i| agent(base_ids[i])).collect();

            let baseline = plan(&Graph::new(base_ids.iter().map(|id| agent(id)).collect(), edges.clone()), 50).unwrap();
            let shuffled = plan(&Graph::new(shuffled_nodes, edges), 50).unwrap();

            proptest::prop_assert_eq!(baseline, shuffled);
        }
    }
}
