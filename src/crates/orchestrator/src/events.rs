//! Typed state-transition events and the per-run pub/sub channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub prompt: u32,
    pub completion: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithSkips,
    Failed,
    BudgetExceeded,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTotals {
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub cost: f64,
    pub duration_ms: u64,
    pub agents_completed: u32,
    pub agents_failed: u32,
    pub agents_skipped: u32,
    pub dropped_events: u64,
}

/// One state transition, tagged by `type`. `timestamp` is carried on every
/// variant rather than hoisted to a wrapping struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ExecutionStarted {
        timestamp: DateTime<Utc>,
        run_id: String,
        total_steps: usize,
        max_parallelism: usize,
        estimated_rounds: usize,
    },
    AgentStarted {
        timestamp: DateTime<Utc>,
        agent_id: String,
        agent_name: String,
        parallel_group: usize,
    },
    AgentCompleted {
        timestamp: DateTime<Utc>,
        agent_id: String,
        tokens: Tokens,
        cost: f64,
        latency_ms: u64,
    },
    AgentFailed {
        timestamp: DateTime<Utc>,
        agent_id: String,
        error: String,
        will_retry: bool,
        retries_remaining: u32,
    },
    AgentRetrying {
        timestamp: DateTime<Utc>,
        agent_id: String,
        retry_number: u32,
    },
    AgentFallback {
        timestamp: DateTime<Utc>,
        original_agent_id: String,
        fallback_agent_id: String,
        reason: String,
    },
    AgentSkipped {
        timestamp: DateTime<Utc>,
        agent_id: String,
        reason: String,
    },
    BudgetWarning {
        timestamp: DateTime<Utc>,
        consumed: f64,
        budget: f64,
        percentage: f64,
    },
    BudgetExceeded {
        timestamp: DateTime<Utc>,
        consumed: f64,
        budget: f64,
        agents_not_run: Vec<String>,
    },
    ExecutionCompleted {
        timestamp: DateTime<Utc>,
        status: RunStatus,
        totals: RunTotals,
    },
}

impl Event {
    /// Terminal events are never dropped for backpressure.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::ExecutionCompleted { .. } | Event::BudgetExceeded { .. })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ExecutionStarted { .. } => "execution_started",
            Event::AgentStarted { .. } => "agent_started",
            Event::AgentCompleted { .. } => "agent_completed",
            Event::AgentFailed { .. } => "agent_failed",
            Event::AgentRetrying { .. } => "agent_retrying",
            Event::AgentFallback { .. } => "agent_fallback",
            Event::AgentSkipped { .. } => "agent_skipped",
            Event::BudgetWarning { .. } => "budget_warning",
            Event::BudgetExceeded { .. } => "budget_exceeded",
            Event::ExecutionCompleted { .. } => "execution_completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Acknowledged,
    Dropped,
}

/// Consumed by the Executor, Backtracker, and Enforcer to fan events out
/// to external subscribers. The core never reads its own events back.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, run_id: &str, event: Event) -> PublishOutcome;

    /// Count of non-terminal events dropped for this run since it started.
    fn dropped_count(&self, run_id: &str) -> u64;

    /// Release resources associated with a finished run's channel.
    fn close(&self, run_id: &str);
}

/// Default in-memory implementation: one `tokio::sync::broadcast` channel
/// per run id. `publish` treats "no active subscribers" as a drop for
/// non-terminal events and an acknowledgment for terminal ones, since a
/// terminal event with nobody listening is still the correct end state for
/// the run itself.
pub struct BroadcastPublisher {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Event>>>,
    dropped: Mutex<HashMap<String, u64>>,
    closed: Mutex<HashSet<String>>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
            dropped: Mutex::new(HashMap::new()),
            closed: Mutex::new(HashSet::new()),
        }
    }

    pub fn subscribe(&self, run_id: &str) -> broadcast::Receiver<Event> {
        let mut channels = self.channels.lock();
        channels
            .entry(run_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, run_id: &str, event: Event) -> PublishOutcome {
        let is_terminal = event.is_terminal();

        let sender = {
            let mut channels = self.channels.lock();
            channels
                .entry(run_id.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .clone()
        };

        match sender.send(event) {
            Ok(_) => PublishOutcome::Acknowledged,
            Err(_) if is_terminal => PublishOutcome::Acknowledged,
            Err(_) => {
                let dropped = {
                    let mut dropped = self.dropped.lock();
                    let count = dropped.entry(run_id.to_string()).or_insert(0);
                    *count += 1;
                    *count
                };
                debug!(run_id, dropped, "event dropped, no subscribers");
                PublishOutcome::Dropped
            }
        }
    }

    fn dropped_count(&self, run_id: &str) -> u64 {
        *self.dropped.lock().get(run_id).unwrap_or(&0)
    }

    fn close(&self, run_id: &str) {
        trace!(run_id, "closing run event channel");
        self.channels.lock().remove(run_id);
        self.closed.lock().insert(run_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let publisher = BroadcastPublisher::default();
        let mut rx = publisher.subscribe("run-1");
        let outcome = publisher
            .publish(
                "run-1",
                Event::AgentStarted {
                    timestamp: Utc::now(),
                    agent_id: "a".into(),
                    agent_name: "a".into(),
                    parallel_group: 0,
                },
            )
            .await;
        assert_eq!(outcome, PublishOutcome::Acknowledged);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "agent_started");
    }

    #[tokio::test]
    async fn publish_without_subscriber_drops_non_terminal() {
        let publisher = BroadcastPublisher::default();
        let outcome = publisher
            .publish(
                "run-1",
                Event::AgentStarted {
                    timestamp: Utc::now(),
                    agent_id: "a".into(),
                    agent_name: "a".into(),
                    parallel_group: 0,
                },
            )
            .await;
        assert_eq!(outcome, PublishOutcome::Dropped);
        assert_eq!(publisher.dropped_count("run-1"), 1);
    }

    #[tokio::test]
    async fn terminal_event_without_subscriber_is_acknowledged() {
        let publisher = BroadcastPublisher::default();
        let outcome = publisher
            .publish(
                "run-1",
                Event::ExecutionCompleted {
                    timestamp: Utc::now(),
                    status: RunStatus::Completed,
                    totals: RunTotals {
                        tokens_prompt: 0,
                        tokens_completion: 0,
                        cost: 0.0,
                        duration_ms: 0,
                        agents_completed: 0,
                        agents_failed: 0,
                        agents_skipped: 0,
                        dropped_events: 0,
                    },
                },
            )
            .await;
        assert_eq!(outcome, PublishOutcome::Acknowledged);
        assert_eq!(publisher.dropped_count("run-1"), 0);
    }
}
