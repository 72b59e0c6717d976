//! Planning error taxonomy.

use crate::graph::NodeId;
use thiserror::Error;

/// Fatal, synchronous failures the Planner can return from `plan()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("workflow graph has no nodes")]
    EmptyWorkflow,

    #[error("workflow graph has {count} nodes, exceeding the cap of {cap}")]
    TooLarge { count: usize, cap: usize },

    #[error("edge references an unknown node: {from} -> {to}")]
    InvalidEdge { from: NodeId, to: NodeId },

    #[error("circular dependency among nodes: {cycle:?}")]
    CircularDependency { cycle: Vec<NodeId> },

    #[error("fallback cycle: {origin} is reachable from its own fallback {fallback}")]
    FallbackCycle { origin: NodeId, fallback: NodeId },
}
