use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use concierge_core::domain::conversation::{ConversationId, ConversationMessage};
use concierge_core::domain::tenant::TenantId;

use super::{
    AvailabilityRepository, AvailabilitySlot, ConversationRepository, RecordRepository,
    RepositoryError, TenantRecord,
};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<ConversationId, Vec<ConversationMessage>>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn load(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<ConversationMessage>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(id).cloned().unwrap_or_default())
    }

    async fn save(
        &self,
        id: &ConversationId,
        messages: &[ConversationMessage],
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(id.clone(), messages.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRecordRepository {
    records: RwLock<HashMap<(TenantId, String), TenantRecord>>,
}

impl InMemoryRecordRepository {
    pub async fn insert(&self, tenant_id: &TenantId, record: TenantRecord) {
        let mut records = self.records.write().await;
        records.insert((tenant_id.clone(), record.record_id.clone()), record);
    }
}

#[async_trait::async_trait]
impl RecordRepository for InMemoryRecordRepository {
    async fn find_record(
        &self,
        tenant_id: &TenantId,
        record_id: &str,
    ) -> Result<Option<TenantRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(&(tenant_id.clone(), record_id.to_string())).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryAvailabilityRepository {
    slots: RwLock<HashMap<TenantId, Vec<AvailabilitySlot>>>,
}

impl InMemoryAvailabilityRepository {
    pub async fn insert(&self, tenant_id: &TenantId, slot: AvailabilitySlot) {
        let mut slots = self.slots.write().await;
        slots.entry(tenant_id.clone()).or_default().push(slot);
    }
}

#[async_trait::async_trait]
impl AvailabilityRepository for InMemoryAvailabilityRepository {
    async fn open_slots(
        &self,
        tenant_id: &TenantId,
        service: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        let slots = self.slots.read().await;
        let mut matching: Vec<AvailabilitySlot> = slots
            .get(tenant_id)
            .into_iter()
            .flatten()
            .filter(|slot| {
                slot.service.eq_ignore_ascii_case(service)
                    && slot.starts_at >= from
                    && slot.starts_at < until
            })
            .cloned()
            .collect();
        matching.sort_by_key(|slot| slot.starts_at);
        Ok(matching)
    }
}
