//! Concierge core - tenant configuration, conversation types and the error
//! taxonomy shared by the agent pipeline, persistence and the binaries.
//!
//! Nothing in this crate talks to the model endpoint. Deterministic business
//! rules (pricing in particular) live here so the model can only ever ask for
//! them, never decide them.

pub mod config;
pub mod domain;
pub mod errors;
pub mod tenants;

pub use chrono;
pub use domain::classification::{Category, ClassificationResult, Confidence, Sentiment};
pub use domain::conversation::{ConversationId, ConversationMessage, MessageRole, ToolCallRef};
pub use domain::tenant::{
    PriceQuote, PricingError, PricingRule, PricingTable, PricingUnit, TenantConfig,
    TenantConfigError, TenantContext, TenantId, ToneProfile,
};
pub use errors::{
    ApplicationError, ClassificationError, EndpointError, InterfaceError, ModelError,
    OrchestrationError,
};
pub use tenants::{FileTenantSource, StaticTenantSource, TenantConfigSource, TenantSourceError};
