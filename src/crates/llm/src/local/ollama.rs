//! Ollama client implementation of the [`Adapter`] contract.
//!
//! Local models are free; the pricing table carries zero-cost entries for
//! them so the Budget Planner's arithmetic stays uniform across providers.

use crate::adapter::{Adapter, ChatOutcome, ChatParams};
use crate::config::LocalLlmConfig;
use crate::error::{LlmError, Result};
use crate::pricing::PricingTable;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Ollama client for local LLM inference.
#[derive(Clone)]
pub struct OllamaAdapter {
    config: LocalLlmConfig,
    client: Client,
    pricing: Arc<PricingTable>,
}

impl OllamaAdapter {
    pub fn new(config: LocalLlmConfig, pricing: Arc<PricingTable>) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build Ollama HTTP client");
        Self { config, client, pricing }
    }

    /// Check whether the Ollama server is reachable.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        matches!(self.client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }
}

#[async_trait]
impl Adapter for OllamaAdapter {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn call(&self, params: ChatParams) -> Result<ChatOutcome> {
        let url = format!("{}/api/chat", self.config.base_url);

        let req_body = OllamaRequest {
            model: self.config.model.clone(),
            messages: vec![
                OllamaMessage { role: "system".to_string(), content: params.system_prompt },
                OllamaMessage { role: "user".to_string(), content: params.user_message },
            ],
            stream: false,
            options: OllamaOptions { temperature: params.temperature },
        };

        debug!(model = %self.config.model, "dispatching Ollama request");
        let started = Instant::now();
        let response = tokio::time::timeout(params.timeout, self.client.post(&url).json(&req_body).send())
            .await
            .map_err(|_| {
                warn!(model = %self.config.model, timeout = ?params.timeout, "Ollama request timed out");
                LlmError::Timeout(format!("Ollama request exceeded {:?}", params.timeout))
            })?
            .map_err(|e| {
                warn!(model = %self.config.model, error = %e, "Ollama request transport error");
                LlmError::HttpError(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(model = %self.config.model, %status, "Ollama API returned an error response");
            return Err(LlmError::ServiceUnavailable(format!("Ollama error {status}: {error_text}")));
        }

        let resp: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let latency_ms = started.elapsed().as_millis() as u64;
        let tokens_prompt = resp.prompt_eval_count.unwrap_or(0);
        let tokens_completion = resp.eval_count.unwrap_or(0);
        let cost = self
            .pricing
            .price(self.provider(), self.model())
            .map(|p| p.cost(tokens_prompt, tokens_completion))
            .unwrap_or(0.0);

        debug!(model = %self.config.model, tokens_prompt, tokens_completion, latency_ms, "Ollama request completed");
        Ok(ChatOutcome {
            text: resp.message.content,
            tokens_prompt,
            tokens_completion,
            model_used: self.config.model.clone(),
            latency_ms,
            cost,
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}
