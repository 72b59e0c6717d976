//! Exponential backoff policy for step retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
    /// Off by default, keeping backoff deterministic for tests. Bounded
    /// jitter can be enabled for production traffic against rate-limited
    /// providers.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 2, base_ms: 1_000, cap_ms: 10_000, jitter: false }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries, ..Default::default() }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// `min(base * 2^attempt, cap)`, attempt is zero-indexed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let scaled = self.base_ms as f64 * 2f64.powi(attempt as i32);
        let capped = scaled.min(self.cap_ms as f64) as u64;
        let delay_ms = if self.jitter {
            let jitter_amount = (capped as f64 * 0.25 * rand::random::<f64>()) as u64;
            capped + jitter_amount
        } else {
            capped
        };
        Duration::from_millis(delay_ms)
    }
}
