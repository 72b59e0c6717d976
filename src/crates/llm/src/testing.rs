//! A scriptable [`Adapter`] for deterministic tests of retry, fallback and
//! skip-propagation behavior without a live provider.

use crate::adapter::{Adapter, ChatOutcome, ChatParams};
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use std::sync::Mutex;

/// One scripted step: either a normalized failure or a completed outcome.
#[derive(Clone)]
pub enum Scripted {
    Fail(fn() -> LlmError),
    Succeed { text: String, tokens_prompt: u32, tokens_completion: u32, cost: f64 },
}

/// Replays a fixed sequence of results, one per call, then repeats the last
/// entry forever. Used to script "fails twice then succeeds" scenarios.
pub struct ScriptedAdapter {
    provider: String,
    model: String,
    script: Mutex<Vec<Scripted>>,
    calls: Mutex<usize>,
}

impl ScriptedAdapter {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, script: Vec<Scripted>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            script: Mutex::new(script),
            calls: Mutex::new(0),
        }
    }

    pub fn always_succeed(provider: impl Into<String>, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            provider,
            model,
            vec![Scripted::Succeed { text: text.into(), tokens_prompt: 10, tokens_completion: 20, cost: 0.001 }],
        )
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn call(&self, _params: ChatParams) -> Result<ChatOutcome> {
        let mut calls = self.calls.lock().unwrap();
        let index = *calls;
        *calls += 1;
        drop(calls);

        let script = self.script.lock().unwrap();
        let step = script
            .get(index)
            .or_else(|| script.last())
            .expect("ScriptedAdapter requires at least one scripted step");

        match step {
            Scripted::Fail(make_err) => Err(make_err()),
            Scripted::Succeed { text, tokens_prompt, tokens_completion, cost } => Ok(ChatOutcome {
                text: text.clone(),
                tokens_prompt: *tokens_prompt,
                tokens_completion: *tokens_completion,
                model_used: self.model.clone(),
                latency_ms: 0,
                cost: *cost,
            }),
        }
    }
}
