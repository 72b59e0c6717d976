//! Engine configuration: defaults, an optional on-disk override, and
//! environment-variable resolution for provider API keys.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use workflow_core::DEFAULT_NODE_CAP;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key_env: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    2
}
fn default_base_ms() -> u64 {
    1_000
}
fn default_cap_ms() -> u64 {
    10_000
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self { max_retries: default_max_retries(), base_ms: default_base_ms(), cap_ms: default_cap_ms(), jitter: false }
    }
}

impl From<&RetryPolicyConfig> for crate::backoff::RetryConfig {
    fn from(cfg: &RetryPolicyConfig) -> Self {
        crate::backoff::RetryConfig { max_retries: cfg.max_retries, base_ms: cfg.base_ms, cap_ms: cfg.cap_ms, jitter: cfg.jitter }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDefaults {
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_cost: Option<f64>,
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self { max_tokens: None, max_cost: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub retry: RetryPolicyConfig,
    #[serde(default)]
    pub budget: BudgetDefaults,
    #[serde(default = "default_node_cap")]
    pub node_cap: usize,
    #[serde(default)]
    pub event_channel_capacity: Option<usize>,
}

fn default_node_cap() -> usize {
    DEFAULT_NODE_CAP
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: std::collections::HashMap::new(),
            retry: RetryPolicyConfig::default(),
            budget: BudgetDefaults::default(),
            node_cap: DEFAULT_NODE_CAP,
            event_channel_capacity: None,
        }
    }
}

impl EngineConfig {
    /// Load from `path` if it exists, falling back to defaults otherwise.
    /// Accepts either YAML or TOML, selected by the file extension.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "engine config not found, using defaults");
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| OrchestratorError::Config(format!("failed to read {}: {e}", path.display())))?;

        let config = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            toml_from_str(&content)?
        } else {
            serde_yaml::from_str(&content).map_err(|e| OrchestratorError::Config(format!("failed to parse {}: {e}", path.display())))?
        };

        info!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Resolve the API key for `provider` from its configured environment
    /// variable, if set.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        let cfg = self.providers.get(provider)?;
        std::env::var(&cfg.api_key_env).ok()
    }

    pub fn api_base(&self, provider: &str) -> Option<String> {
        self.providers.get(provider).and_then(|c| c.api_base.clone())
    }
}

fn toml_from_str(content: &str) -> Result<EngineConfig> {
    // Reuses the YAML schema: the engine only ever needs one on-disk
    // format active at a time, and both line up 1:1 structurally.
    serde_yaml::from_str(&yaml_from_toml_roundtrip(content)?).map_err(|e| OrchestratorError::Config(e.to_string()))
}

fn yaml_from_toml_roundtrip(content: &str) -> Result<String> {
    let value: toml::Value = content.parse().map_err(|e: toml::de::Error| OrchestratorError::Config(e.to_string()))?;
    serde_yaml::to_string(&value).map_err(|e| OrchestratorError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_config_file_yields_defaults() {
        let config = EngineConfig::load("/nonexistent/engine.yaml").await.unwrap();
        assert_eq!(config.node_cap, DEFAULT_NODE_CAP);
        assert!(config.budget.max_cost.is_none());
    }

    #[tokio::test]
    async fn yaml_config_parses_provider_and_retry_overrides() {
        let dir = tempdir();
        let path = dir.join("engine.yaml");
        tokio::fs::write(
            &path,
            "providers:\n  anthropic:\n    api_key_env: ANTHROPIC_API_KEY\nretry:\n  max_retries: 5\nbudget:\n  max_cost: 1.5\n",
        )
        .await
        .unwrap();

        let config = EngineConfig::load(&path).await.unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.budget.max_cost, Some(1.5));
        assert!(config.providers.contains_key("anthropic"));

        tokio::fs::remove_file(&path).await.ok();
    }

    fn tempdir() -> std::path::PathBuf {
        std::env::temp_dir()
    }
}
