//! Remote (cloud-hosted) LLM provider clients.

pub mod claude;
pub mod openai;

pub use claude::ClaudeAdapter;
pub use openai::OpenAiAdapter;
