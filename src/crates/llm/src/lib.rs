//! Normalized LLM adapter contract and provider clients.
//!
//! This crate implements the **Adapter** contract from the execution
//! engine's specification: a uniform request/response shape over
//! provider-specific SDKs, and the **Pricing Table** used to compute cost
//! from token counts. All other engine components — the Planner, Executor,
//! Backtracker, Budget Planner, Event Publisher — depend only on the traits
//! defined here, never on a specific provider.

pub mod adapter;
pub mod config;
pub mod error;
pub mod pricing;

#[cfg(feature = "local")]
pub mod local;

#[cfg(feature = "remote")]
pub mod remote;

pub mod testing;

pub use adapter::{Adapter, AdapterRegistry, ChatOutcome, ChatParams, StaticAdapterRegistry};
pub use error::{ErrorKind, LlmError, Result};
pub use pricing::{ModelPrice, PricingTable};
