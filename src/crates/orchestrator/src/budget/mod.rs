//! Budget Planner: static pre-run estimation, cost-reduction suggestions,
//! and runtime enforcement.

pub mod enforcer;
pub mod estimator;
pub mod suggestions;

pub use enforcer::Enforcer;
pub use estimator::{estimate, ConfidenceTier, CostEstimate, StepEstimate};
pub use suggestions::{suggest, Suggestion, SuggestionAction};
