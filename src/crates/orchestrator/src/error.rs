//! Orchestrator error taxonomy.

use thiserror::Error;
use workflow_core::PlanningError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    /// Static pre-run estimate already exceeds the submitted budget ceiling.
    #[error("estimated cost {estimated} exceeds budget ceiling {ceiling}")]
    BudgetExceededEstimate { estimated: f64, ceiling: f64 },

    #[error("config error: {0}")]
    Config(String),

    #[error("no adapter registered for provider {provider:?} model {model:?}")]
    AdapterNotFound { provider: String, model: String },

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
