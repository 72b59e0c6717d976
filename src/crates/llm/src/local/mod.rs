//! Local LLM provider clients (self-hosted inference servers).

pub mod ollama;

pub use ollama::OllamaAdapter;
