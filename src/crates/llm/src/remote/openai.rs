//! OpenAI client implementation of the [`Adapter`] contract.

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

#[derive(Clone)]
pub struct OpenAiAdapter {
    config: RemoteLlmConfig,
    client: Client,
    pricing: Arc<PricingTable>,
}

impl OpenAiAdapter {
    pub fn new(config: RemoteLlmConfig, pricing: Arc<PricingTable>) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build OpenAI HTTP client");
        Self { config, client, pricing }
    }
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn call(&self, params: ChatParams) -> Result<ChatOutcome> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let req_body = OpenAiRequest {
            model: self.config.model.clone(),
            messages: vec![
                OpenAiMessage { role: "system".to_string(), content: params.system_prompt },
                OpenAiMessage { role: "user".to_string(), content: params.user_message },
            ],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&req_body);
        if let Some(org) = &self.config.organization {
            request = request.header("OpenAI-Organization", org);
        }

        debug!(model = %self.config.model, "dispatching OpenAI request");
        let started = Instant::now();
        let response = tokio::time::timeout(params.timeout, request.send())
            .await
            .map_err(|_| {
                warn!(model = %self.config.model, timeout = ?params.timeout, "OpenAI request timed out");
                LlmError::Timeout(format!("OpenAI request exceeded {:?}", params.timeout))
            })?
            .map_err(|e| {
                warn!(model = %self.config.model, error = %e, "OpenAI request transport error");
                LlmError::HttpError(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(model = %self.config.model, %status, "OpenAI API returned an error response");
            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthenticationError(error_text),
                429 => LlmError::RateLimitExceeded(error_text),
                500..=599 => LlmError::ServiceUnavailable(format!("{status}: {error_text}")),
                _ => LlmError::ProviderError(format!("OpenAI API error {status}: {error_text}")),
            });
        }

        let resp: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("OpenAI response had no choices".to_string()))?;

        let latency_ms = started.elapsed().as_millis() as u64;
        let tokens_prompt = resp.usage.prompt_tokens;
        let tokens_completion = resp.usage.completion_tokens;
        let cost = self
            .pricing
            .price(self.provider(), self.model())
            .map(|p| p.cost(tokens_prompt, tokens_completion))
            .unwrap_or(0.0);

        debug!(model = %self.config.model, tokens_prompt, tokens_completion, latency_ms, "OpenAI request completed");
        Ok(ChatOutcome {
            text: choice.message.content,
            tokens_prompt,
            tokens_completion,
            model_used: resp.model,
            latency_ms,
            cost,
        })
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
