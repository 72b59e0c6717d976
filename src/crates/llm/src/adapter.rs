//! The normalized Adapter contract: one uniform request/response shape
//! over any provider-specific SDK.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Per-call generation parameters, resolved from a node's `AgentConfig`.
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub system_prompt: String,
    pub user_message: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// A completed, normalized provider response.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub text: String,
    pub tokens_prompt: u32,
    pub tokens_completion: u32,
    pub model_used: String,
    pub latency_ms: u64,
    pub cost: f64,
}

/// Uniform interface over a single provider/model pair. Each concrete
/// provider client is bound to one `(provider, model)` combination and
/// computes its own cost from a shared `PricingTable`; the engine never
/// consults pricing directly during a step.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The provider tag this adapter serves, e.g. `"anthropic"`.
    fn provider(&self) -> &str;

    /// The model identifier this adapter serves, e.g. `"claude-3-sonnet"`.
    fn model(&self) -> &str;

    async fn call(&self, params: ChatParams) -> Result<ChatOutcome>;
}

/// Resolves a `(provider, model)` pair to a concrete [`Adapter`]. Kept
/// separate from the adapters themselves so the Executor can look up a
/// fallback node's adapter without depending on a fixed provider set.
pub trait AdapterRegistry: Send + Sync {
    fn resolve(&self, provider: &str, model: &str) -> Option<std::sync::Arc<dyn Adapter>>;
}

/// A simple in-memory registry keyed by `(provider, model)`.
#[derive(Default)]
pub struct StaticAdapterRegistry {
    adapters: std::collections::HashMap<(String, String), std::sync::Arc<dyn Adapter>>,
}

impl StaticAdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: std::sync::Arc<dyn Adapter>) {
        let key = (adapter.provider().to_string(), adapter.model().to_string());
        self.adapters.insert(key, adapter);
    }
}

impl AdapterRegistry for StaticAdapterRegistry {
    fn resolve(&self, provider: &str, model: &str) -> Option<std::sync::Arc<dyn Adapter>> {
        self.adapters.get(&(provider.to_string(), model.to_string())).cloned()
    }
}
