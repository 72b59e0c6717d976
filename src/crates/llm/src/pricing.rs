//! The Pricing Table: per-model input/output unit prices.
//!
//! Loaded once at startup and cached immutably; hot-reload is out of
//! scope. Cost is always computed by the Adapter from this table, the
//! engine never queries pricing directly mid-run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-1000-token input/output price for one provider/model pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPrice {
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.input_per_1k
            + (completion_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// Immutable `provider -> model -> price` lookup table.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    prices: HashMap<(String, String), ModelPrice>,
    /// Provider-pinned downgrade ladders, e.g. `claude-3-opus -> claude-3-sonnet -> claude-3-haiku`.
    ladders: HashMap<(String, String), Vec<String>>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, provider: impl Into<String>, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert((provider.into(), model.into()), price);
        self
    }

    pub fn with_ladder(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        ladder: Vec<String>,
    ) -> Self {
        self.ladders.insert((provider.into(), model.into()), ladder);
        self
    }

    pub fn price(&self, provider: &str, model: &str) -> Option<ModelPrice> {
        self.prices.get(&(provider.to_string(), model.to_string())).copied()
    }

    /// The ordered chain of cheaper substitute models for `(provider, model)`,
    /// nearest (least degraded) first. Empty if no ladder is configured.
    pub fn downgrade_ladder(&self, provider: &str, model: &str) -> &[String] {
        self.ladders
            .get(&(provider.to_string(), model.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The default pricing table, mirroring public list-price order of
    /// magnitude for the providers the engine ships adapters for. Intended as
    /// a seed; production deployments load their own table from config.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        let seed: &[(&str, &str, f64, f64)] = &[
            ("anthropic", "claude-3-opus", 15.0, 75.0),
            ("anthropic", "claude-3-sonnet", 3.0, 15.0),
            ("anthropic", "claude-3-haiku", 0.25, 1.25),
            ("openai", "gpt-4-turbo", 10.0, 30.0),
            ("openai", "gpt-4o", 5.0, 15.0),
            ("openai", "gpt-4o-mini", 0.15, 0.6),
            ("ollama", "llama3", 0.0, 0.0),
        ];
        for (provider, model, input_per_1k, output_per_1k) in seed {
            table = table.with_price(*provider, *model, ModelPrice { input_per_1k: *input_per_1k, output_per_1k: *output_per_1k });
        }
        table
            .with_ladder(
                "anthropic",
                "claude-3-opus",
                vec!["claude-3-sonnet".to_string(), "claude-3-haiku".to_string()],
            )
            .with_ladder("anthropic", "claude-3-sonnet", vec!["claude-3-haiku".to_string()])
            .with_ladder(
                "openai",
                "gpt-4-turbo",
                vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
            )
            .with_ladder("openai", "gpt-4o", vec!["gpt-4o-mini".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_computed_per_1k_tokens() {
        let price = ModelPrice { input_per_1k: 3.0, output_per_1k: 15.0 };
        let cost = price.cost(2000, 500);
        assert!((cost - (2.0 * 3.0 + 0.5 * 15.0)).abs() < 1e-9);
    }

    #[test]
    fn default_table_has_downgrade_ladder() {
        let table = PricingTable::with_defaults();
        let ladder = table.downgrade_ladder("anthropic", "claude-3-opus");
        assert_eq!(ladder, &["claude-3-sonnet".to_string(), "claude-3-haiku".to_string()]);
    }

    #[test]
    fn unknown_model_has_no_price() {
        let table = PricingTable::with_defaults();
        assert!(table.price("acme", "unobtainium").is_none());
    }
}
