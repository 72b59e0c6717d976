//! Graph, plan, and run-state data model for the workflow execution
//! engine, plus the DAG **Planner**.
//!
//! This crate is pure and synchronous: it validates a workflow graph,
//! computes its topological execution plan with ASAP parallel grouping,
//! and defines the in-memory state shapes (`RunState`, `BudgetState`) the
//! Executor, Backtracker, and Budget Planner mutate as a run progresses.
//! It performs no IO and depends on no async runtime.

pub mod budget_state;
pub mod error;
pub mod graph;
pub mod plan;
pub mod run_state;

pub use budget_state::{BudgetCheck, BudgetState};
pub use error::PlanningError;
pub use graph::{
    AgentConfig, ConditionalConfig, Edge, EdgeCondition, Graph, Node, NodeId, NodeKind, ToolConfig,
    DEFAULT_NODE_CAP,
};
pub use plan::{plan, ExecutionPlan, Group, PlannedNode};
pub use run_state::{NodeStatus, RunState, StepOutput, StepRecord};
