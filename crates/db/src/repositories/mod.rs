use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use concierge_core::domain::conversation::{ConversationId, ConversationMessage};
use concierge_core::domain::tenant::TenantId;

pub mod availability;
pub mod conversation;
pub mod memory;
pub mod record;

pub use availability::SqlAvailabilityRepository;
pub use conversation::SqlConversationRepository;
pub use memory::{
    InMemoryAvailabilityRepository, InMemoryConversationRepository, InMemoryRecordRepository,
};
pub use record::SqlRecordRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Ordered conversation history, addressed by tenant-scoped id.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn load(&self, id: &ConversationId)
        -> Result<Vec<ConversationMessage>, RepositoryError>;

    /// Replaces the whole stored history of `id` with `messages`.
    async fn save(
        &self,
        id: &ConversationId,
        messages: &[ConversationMessage],
    ) -> Result<(), RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TenantRecord {
    pub record_id: String,
    pub kind: String,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
}

/// Read-only lookup of tenant business records (bookings, customers, ...).
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn find_record(
        &self,
        tenant_id: &TenantId,
        record_id: &str,
    ) -> Result<Option<TenantRecord>, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AvailabilitySlot {
    pub service: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Read-only view of open slots for a tenant's service.
#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    /// Slots of `service` starting within `[from, until)`, ordered by start.
    async fn open_slots(
        &self,
        tenant_id: &TenantId,
        service: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError>;
}

pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{value}`: {error}")))
}
