//! Agent runtime - the model-facing half of the concierge pipeline.
//!
//! Inbound text is classified, then either answered from a tenant template
//! (tone-restyled by the model) or handed to a bounded tool-calling loop:
//!
//! 1. **Classification** (`classifier`) - schema-constrained, closed categories
//! 2. **Templated reply** (`responder`) - template, restyle, fixed signature
//! 3. **Tool loop** (`orchestrator`) - capped model calls over read-only `tools`
//! 4. **Memory** (`memory`) - bounded, summarized conversation context
//!
//! Every model call goes through [`resilience::ResilientModelClient`], which is
//! guarded by a shared [`circuit::CircuitBreaker`].
//!
//! # Safety Principle
//!
//! The model only translates. Prices, records and availability come from the
//! tenant's rules and stores through tools the tenant has enabled.

pub mod circuit;
pub mod classifier;
pub mod guardrails;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod resilience;
pub mod responder;
pub mod runtime;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use circuit::{BreakerPolicy, CircuitBreaker, CircuitSnapshot, CircuitStatus};
pub use llm::{HttpChatClient, LlmClient, ModelReply, ModelRequest};
pub use resilience::ResilientModelClient;
pub use runtime::{AgentReply, AgentRuntime, InboundMessage, Route, RuntimeError};
pub use tools::ToolRegistry;
