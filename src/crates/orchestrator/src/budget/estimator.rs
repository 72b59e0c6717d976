//! Pre-run static cost estimation.

use llm::PricingTable;
use serde::{Deserialize, Serialize};
use tracing::debug;
use workflow_core::ExecutionPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEstimate {
    pub node_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub steps: Vec<StepEstimate>,
    pub total_cost: f64,
    pub confidence: ConfidenceTier,
}

const DEPENDENCY_OUTPUT_FRACTION: f64 = 0.6;
const FRAMING_OVERHEAD_PER_DEP: u32 = 50;
const BASE_USER_INPUT_TOKENS: u32 = 200;
const HIGH_CONFIDENCE_MAX_TOKENS: u32 = 1024;
const HIGH_CONFIDENCE_MAX_PROMPT_CHARS: usize = 512;
const LOW_CONFIDENCE_MAX_TOKENS: u32 = 4096;

/// Estimate prompt/completion tokens and cost for every agent step in
/// `plan`, using the "60% rule": a dependency contributes 60% of its own
/// configured `max_output_tokens` to the downstream prompt estimate.
/// Conditional and tool nodes carry no adapter cost and are excluded from
/// the cost total but still count toward the confidence tier.
pub fn estimate(plan: &ExecutionPlan, pricing: &PricingTable) -> CostEstimate {
    let mut steps = Vec::new();
    let mut total_cost = 0.0;
    let mut has_conditional = false;
    let mut all_within_high_tier = true;
    let mut any_over_low_tier = false;

    for group in &plan.groups {
        for planned in &group.nodes {
            if planned.node.is_conditional() {
                has_conditional = true;
                continue;
            }
            let Some(cfg) = planned.node.agent_config() else { continue };

            let dep_count = planned.dependencies.len() as u32;
            let dependency_tokens: f64 = planned
                .dependencies
                .iter()
                .filter_map(|dep_id| plan.node(dep_id))
                .map(|dep| dep.node.max_output_tokens() as f64 * DEPENDENCY_OUTPUT_FRACTION)
                .sum();

            let framing_overhead = FRAMING_OVERHEAD_PER_DEP * dep_count;
            let base_input = if dep_count == 0 { BASE_USER_INPUT_TOKENS } else { 0 };
            let system_prompt_tokens = (cfg.system_prompt.len() as f64 / 4.0).ceil() as u32;

            let prompt_tokens = system_prompt_tokens + dependency_tokens as u32 + framing_overhead + base_input;
            let completion_tokens = cfg.max_output_tokens;

            if completion_tokens > HIGH_CONFIDENCE_MAX_TOKENS || cfg.system_prompt.len() > HIGH_CONFIDENCE_MAX_PROMPT_CHARS {
                all_within_high_tier = false;
            }
            if completion_tokens > LOW_CONFIDENCE_MAX_TOKENS {
                any_over_low_tier = true;
            }

            let cost = pricing
                .price(&cfg.provider, &cfg.model)
                .map(|p| p.cost(prompt_tokens, completion_tokens))
                .unwrap_or(0.0);
            total_cost += cost;

            steps.push(StepEstimate {
                node_id: planned.node.id.clone(),
                provider: cfg.provider.clone(),
                model: cfg.model.clone(),
                prompt_tokens,
                completion_tokens,
                cost,
            });
        }
    }

    let confidence = if !has_conditional && all_within_high_tier && !any_over_low_tier {
        ConfidenceTier::High
    } else if has_conditional || any_over_low_tier {
        ConfidenceTier::Low
    } else {
        ConfidenceTier::Medium
    };

    debug!(steps = steps.len(), total_cost, ?confidence, "pre-run cost estimate computed");
    CostEstimate { steps, total_cost, confidence }
}
