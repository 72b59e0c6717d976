//! Anthropic Claude client implementation of the [`Adapter`] contract.

use crate::adapter::{Adapter, ChatOutcome, ChatParams};
use crate::config::RemoteLlmConfig;
use crate::error::{LlmError, Result};
use crate::pricing::PricingTable;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude API client.
#[derive(Clone)]
pub struct ClaudeAdapter {
    config: RemoteLlmConfig,
    client: Client,
    pricing: Arc<PricingTable>,
}

impl ClaudeAdapter {
    pub fn new(config: RemoteLlmConfig, pricing: Arc<PricingTable>) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build Claude HTTP client");
        Self { config, client, pricing }
    }
}

#[async_trait]
impl Adapter for ClaudeAdapter {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn call(&self, params: ChatParams) -> Result<ChatOutcome> {
        let url = format!("{}/v1/messages", self.config.base_url);

        let req_body = ClaudeRequest {
            model: self.config.model.clone(),
            system: Some(params.system_prompt),
            messages: vec![ClaudeMessage { role: "user".to_string(), content: params.user_message }],
            max_tokens: params.max_tokens,
            temperature: Some(params.temperature),
            stream: false,
        };

        debug!(model = %self.config.model, "dispatching Claude request");
        let started = Instant::now();
        let response = tokio::time::timeout(
            params.timeout,
            self.client
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&req_body)
                .send(),
        )
        .await
        .map_err(|_| {
            warn!(model = %self.config.model, timeout = ?params.timeout, "Claude request timed out");
            LlmError::Timeout(format!("Claude request exceeded {:?}", params.timeout))
        })?
        .map_err(|e| {
            warn!(model = %self.config.model, error = %e, "Claude request transport error");
            LlmError::HttpError(e)
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(model = %self.config.model, %status, "Claude API returned an error response");
            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthenticationError(error_text),
                429 => LlmError::RateLimitExceeded(error_text),
                500..=599 => LlmError::ServiceUnavailable(format!("{status}: {error_text}")),
                _ => LlmError::ProviderError(format!("Claude API error {status}: {error_text}")),
            });
        }

        let claude_resp: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let latency_ms = started.elapsed().as_millis() as u64;
        let tokens_prompt = claude_resp.usage.input_tokens;
        let tokens_completion = claude_resp.usage.output_tokens;
        let cost = self
            .pricing
            .price(self.provider(), self.model())
            .map(|p| p.cost(tokens_prompt, tokens_completion))
            .unwrap_or(0.0);

        let text = claude_resp
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        debug!(model = %self.config.model, tokens_prompt, tokens_completion, latency_ms, "Claude request completed");
        Ok(ChatOutcome {
            text,
            tokens_prompt,
            tokens_completion,
            model_used: claude_resp.model,
            latency_ms,
            cost,
        })
    }
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ClaudeMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    model: String,
    content: Vec<ClaudeContentBlock>,
    usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
struct ClaudeContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}
