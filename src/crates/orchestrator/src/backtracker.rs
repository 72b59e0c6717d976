//! Per-step retry, fallback substitution, and downstream skip propagation.

use crate::backoff::RetryConfig;
use crate::events::{Event, Publisher};
use crate::executor::StepInput;
use chrono::Utc;
use llm::{AdapterRegistry, ChatParams, ErrorKind};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use workflow_core::{AgentConfig, Node, NodeId, NodeStatus, RunState};

#[derive(Debug, Clone)]
pub struct StepOutput {
    pub agent_name: String,
    pub text: String,
}

#[derive(Debug)]
pub enum StepOutcome {
    Completed {
        output: StepOutput,
        tokens_prompt: u32,
        tokens_completion: u32,
        cost: f64,
        attempts: u32,
        latency_ms: u64,
    },
    /// The original exhausted its retries and a configured fallback ran in
    /// its place. `fallback_outcome` is always `Completed` or `Failed`;
    /// fallbacks never chain.
    FailedWithFallback {
        original_attempts: u32,
        fallback_id: NodeId,
        fallback_outcome: Box<StepOutcome>,
    },
    Failed {
        kind: ErrorKind,
        message: String,
        attempts: u32,
    },
    Cancelled,
}

fn build_chat_params(cfg: &AgentConfig, input: &StepInput) -> ChatParams {
    let mut parts = Vec::new();
    if let Some(root) = &input.root_input {
        parts.push(root.clone());
    }
    let mut deps: Vec<_> = input.dependencies.iter().collect();
    deps.sort_by(|a, b| a.0.cmp(b.0));
    for (dep_id, dep) in deps {
        parts.push(format!("[{dep_id} / {}]: {}", dep.agent_name, dep.text));
    }
    let user_message = parts.join("\n\n");

    ChatParams {
        system_prompt: cfg.system_prompt.clone(),
        user_message,
        temperature: cfg.temperature,
        max_tokens: cfg.max_output_tokens,
        timeout: std::time::Duration::from_secs(cfg.timeout_secs as u64),
    }
}

enum AttemptFailure {
    Adapter(ErrorKind, String),
    Cancelled,
}

type AttemptOk = (StepOutput, u32, u32, f64, u32, u64);

async fn attempt_with_retries(
    agent_id: &NodeId,
    cfg: &AgentConfig,
    input: &StepInput,
    retry_config: &RetryConfig,
    cancel: &CancellationToken,
    registry: &dyn AdapterRegistry,
    publisher: &dyn Publisher,
    run_id: &str,
) -> Result<AttemptOk, (AttemptFailure, u32)> {
    let params = build_chat_params(cfg, input);

    let Some(adapter) = registry.resolve(&cfg.provider, &cfg.model) else {
        return Err((
            AttemptFailure::Adapter(ErrorKind::Configuration, format!("no adapter for {}/{}", cfg.provider, cfg.model)),
            0,
        ));
    };

    // Each node carries its own retry budget; only the backoff shape
    // (base/cap/jitter) is shared engine-wide.
    let retry_config = RetryConfig { max_retries: cfg.max_retries, ..retry_config.clone() };
    let retry_config = &retry_config;

    let mut invalid_response_retries_used = 0u32;

    for attempt in 0..=retry_config.max_retries {
        if cancel.is_cancelled() {
            info!(agent_id, attempt, "cancelled before dispatch");
            return Err((AttemptFailure::Cancelled, attempt));
        }

        debug!(agent_id, attempt, provider = %cfg.provider, model = %cfg.model, "dispatching step");
        let call_start = Instant::now();
        match adapter.call(params.clone()).await {
            Ok(outcome) => {
                debug!(agent_id, attempt, tokens_prompt = outcome.tokens_prompt, tokens_completion = outcome.tokens_completion, "step completed");
                return Ok((
                    StepOutput { agent_name: agent_id.clone(), text: outcome.text },
                    outcome.tokens_prompt,
                    outcome.tokens_completion,
                    outcome.cost,
                    attempt + 1,
                    call_start.elapsed().as_millis() as u64,
                ));
            }
            Err(err) => {
                let kind = err.kind();
                let is_invalid_response = matches!(kind, ErrorKind::InvalidResponse);
                if is_invalid_response {
                    invalid_response_retries_used += 1;
                }
                // Invalid-response payloads get at most one extra attempt
                // regardless of the node's configured retry budget.
                let retryable = err.is_retryable() && !(is_invalid_response && invalid_response_retries_used > 1);
                let at_last_attempt = attempt == retry_config.max_retries;
                let will_retry = retryable && !at_last_attempt;
                let retries_remaining = retry_config.max_retries.saturating_sub(attempt);

                warn!(agent_id, attempt, kind = ?kind, will_retry, retries_remaining, error = %err, "step failed");

                publisher
                    .publish(
                        run_id,
                        Event::AgentFailed {
                            timestamp: Utc::now(),
                            agent_id: agent_id.clone(),
                            error: err.to_string(),
                            will_retry,
                            retries_remaining,
                        },
                    )
                    .await;

                if !will_retry {
                    warn!(agent_id, attempt, "retries exhausted, step failed terminally");
                    return Err((AttemptFailure::Adapter(kind, err.to_string()), attempt + 1));
                }

                let delay = retry_config.backoff_delay(attempt);
                info!(agent_id, attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        info!(agent_id, attempt, "cancelled during backoff");
                        return Err((AttemptFailure::Cancelled, attempt + 1));
                    }
                }

                publisher
                    .publish(
                        run_id,
                        Event::AgentRetrying { timestamp: Utc::now(), agent_id: agent_id.clone(), retry_number: attempt + 1 },
                    )
                    .await;
            }
        }
    }

    unreachable!("loop either returns Ok or an Err on every iteration")
}

/// Run `node` (and, on exhausted retries, its configured fallback) to a
/// terminal `StepOutcome`. Never mutates shared state; the driver applies
/// the returned outcome to `RunState` itself.
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    node: &Node,
    fallback_node: Option<&Node>,
    fallback_group: Option<usize>,
    input: &StepInput,
    retry_config: &RetryConfig,
    cancel: &CancellationToken,
    registry: &dyn AdapterRegistry,
    publisher: &dyn Publisher,
    run_id: &str,
) -> StepOutcome {
    let Some(cfg) = node.agent_config() else {
        return StepOutcome::Failed {
            kind: ErrorKind::Configuration,
            message: format!("node {} is not an agent step", node.id),
            attempts: 0,
        };
    };

    match attempt_with_retries(&node.id, cfg, input, retry_config, cancel, registry, publisher, run_id).await {
        Ok((output, tp, tc, cost, attempts, latency_ms)) => {
            StepOutcome::Completed { output, tokens_prompt: tp, tokens_completion: tc, cost, attempts, latency_ms }
        }
        Err((AttemptFailure::Cancelled, _)) => StepOutcome::Cancelled,
        Err((AttemptFailure::Adapter(kind, message), attempts)) => {
            let Some(fallback) = fallback_node else {
                return StepOutcome::Failed { kind, message, attempts };
            };
            let Some(fallback_cfg) = fallback.agent_config() else {
                return StepOutcome::Failed { kind, message, attempts };
            };

            warn!(agent_id = %node.id, fallback_id = %fallback.id, attempts, "falling back after exhausted retries");

            publisher
                .publish(
                    run_id,
                    Event::AgentFallback {
                        timestamp: Utc::now(),
                        original_agent_id: node.id.clone(),
                        fallback_agent_id: fallback.id.clone(),
                        reason: "max_retries_exhausted".to_string(),
                    },
                )
                .await;

            publisher
                .publish(
                    run_id,
                    Event::AgentStarted {
                        timestamp: Utc::now(),
                        agent_id: fallback.id.clone(),
                        agent_name: fallback.id.clone(),
                        parallel_group: fallback_group.unwrap_or(0),
                    },
                )
                .await;

            let fallback_outcome =
                match attempt_with_retries(&fallback.id, fallback_cfg, input, retry_config, cancel, registry, publisher, run_id).await {
                    Ok((output, tp, tc, fcost, fattempts, latency_ms)) => StepOutcome::Completed {
                        output,
                        tokens_prompt: tp,
                        tokens_completion: tc,
                        cost: fcost,
                        attempts: fattempts,
                        latency_ms,
                    },
                    Err((AttemptFailure::Cancelled, _)) => StepOutcome::Cancelled,
                    Err((AttemptFailure::Adapter(fkind, fmessage), fattempts)) => {
                        StepOutcome::Failed { kind: fkind, message: fmessage, attempts: fattempts }
                    }
                };

            StepOutcome::FailedWithFallback {
                original_attempts: attempts,
                fallback_id: fallback.id.clone(),
                fallback_outcome: Box::new(fallback_outcome),
            }
        }
    }
}

/// Mark every descendant of `origin` unreachable-without-a-completed-path
/// as `skipped`, transitively. A node stays `pending` (to run later with a
/// partial input map) as long as at least one of its dependencies is still
/// completed or not yet resolved.
pub fn propagate_skips(
    dependents: &HashMap<NodeId, Vec<NodeId>>,
    dependencies: &HashMap<NodeId, Vec<NodeId>>,
    run_state: &mut RunState,
    origin: &NodeId,
    reason: &str,
) -> Vec<NodeId> {
    let mut newly_skipped = Vec::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    queue.push_back(origin.clone());

    while let Some(cur) = queue.pop_front() {
        let Some(children) = dependents.get(&cur) else { continue };
        for child in children {
            if run_state.status_of(child) != Some(NodeStatus::Pending) {
                continue;
            }
            let deps_unsatisfiable = dependencies.get(child).map_or(true, |deps| {
                deps.iter().all(|d| {
                    matches!(
                        run_state.status_of(d),
                        Some(NodeStatus::Failed) | Some(NodeStatus::Skipped) | Some(NodeStatus::NotRun)
                    )
                })
            });
            if deps_unsatisfiable {
                run_state.set_status(child, NodeStatus::Skipped);
                if let Some(step) = run_state.steps.get_mut(child) {
                    step.skip_reason = Some(reason.to_string());
                }
                newly_skipped.push(child.clone());
                queue.push_back(child.clone());
            }
        }
    }

    if !newly_skipped.is_empty() {
        debug!(origin = %origin, reason, count = newly_skipped.len(), "propagated skip to dependents");
    }

    newly_skipped
}
