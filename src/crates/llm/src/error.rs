//! Error types for LLM provider implementations.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when calling an LLM provider.
///
/// `kind()` maps each variant onto the normalized `ErrorKind` the engine's
/// Backtracker classifies retry decisions on.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP transport failure (connection reset, DNS, etc.) — transient.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Provider returned a 5xx or reported temporary unavailability.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Provider returned 429 / rate-limit.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// A single attempt exceeded its timeout budget.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Authentication or authorization failure — non-retryable.
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Missing or malformed client configuration — non-retryable.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Provider responded with a payload that failed schema validation.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Provider-side error not otherwise classified.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Request/response (de)serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// The normalized error classification from the Adapter contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    RateLimited,
    Timeout,
    Configuration,
    InvalidResponse,
}

impl LlmError {
    /// Classify this error for the Backtracker's retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::HttpError(_) | LlmError::ServiceUnavailable(_) | LlmError::ProviderError(_) => {
                ErrorKind::Transient
            }
            LlmError::RateLimitExceeded(_) => ErrorKind::RateLimited,
            LlmError::Timeout(_) => ErrorKind::Timeout,
            LlmError::AuthenticationError(_) | LlmError::ConfigError(_) => ErrorKind::Configuration,
            LlmError::InvalidResponse(_) | LlmError::SerializationError(_) => ErrorKind::InvalidResponse,
        }
    }

    /// Whether the Backtracker should ever retry this error class.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Configuration)
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::SerializationError(err.to_string())
    }
}
