use chrono::SecondsFormat;
use sqlx::{sqlite::SqliteRow, Row};

use concierge_core::domain::conversation::{
    ConversationId, ConversationMessage, MessageRole, ToolCallRef,
};

use super::{parse_timestamp, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn load(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<ConversationMessage>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT role, content, tool_call_json, is_summary, created_at
            FROM conversation_messages
            WHERE tenant_id = ? AND conversation_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(id.tenant_id.as_str())
        .bind(&id.thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn save(
        &self,
        id: &ConversationId,
        messages: &[ConversationMessage],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM conversation_messages WHERE tenant_id = ? AND conversation_id = ?")
            .bind(id.tenant_id.as_str())
            .bind(&id.thread_id)
            .execute(&mut *tx)
            .await?;

        for (position, message) in messages.iter().enumerate() {
            let tool_call_json = message
                .tool_call
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO conversation_messages (
                    tenant_id, conversation_id, position, role, content,
                    tool_call_json, is_summary, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id.tenant_id.as_str())
            .bind(&id.thread_id)
            .bind(position as i64)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(tool_call_json)
            .bind(message.summary)
            .bind(message.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn message_from_row(row: &SqliteRow) -> Result<ConversationMessage, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;

    let tool_call = row
        .try_get::<Option<String>, _>("tool_call_json")?
        .map(|raw| serde_json::from_str::<ToolCallRef>(&raw))
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("invalid tool call payload: {error}")))?;

    Ok(ConversationMessage {
        role,
        content: row.try_get("content")?,
        tool_call,
        summary: row.try_get::<bool, _>("is_summary")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::conversation::{ConversationId, ConversationMessage, ToolCallRef};
    use concierge_core::domain::tenant::TenantId;
    use serde_json::json;

    use super::SqlConversationRepository;
    use crate::connection::connect_in_memory;
    use crate::migrations::run_pending;
    use crate::repositories::ConversationRepository;

    async fn repository() -> SqlConversationRepository {
        let pool = connect_in_memory().await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlConversationRepository::new(pool)
    }

    fn conversation(tenant: &str, thread: &str) -> ConversationId {
        ConversationId::new(TenantId(tenant.to_string()), thread)
    }

    #[tokio::test]
    async fn save_then_load_preserves_order_and_tool_links() {
        let repo = repository().await;
        let id = conversation("harbor-spa", "thread-1");
        let call = ToolCallRef {
            id: "call-1".to_string(),
            name: "calculate_price".to_string(),
            arguments: json!({ "service": "massage", "quantity": 2 }),
        };
        let history = vec![
            ConversationMessage::summary("Earlier: guest asked about opening hours."),
            ConversationMessage::user("How much is a two hour massage?"),
            ConversationMessage::tool_request(call.clone()),
            ConversationMessage::tool_result(call, r#"{"amount":"160.00"}"#),
            ConversationMessage::assistant("A two hour massage is 160.00 EUR."),
        ];

        repo.save(&id, &history).await.expect("save");
        let loaded = repo.load(&id).await.expect("load");

        assert_eq!(loaded, history);
        assert!(loaded[0].is_summary());
    }

    #[tokio::test]
    async fn save_replaces_previous_history() {
        let repo = repository().await;
        let id = conversation("harbor-spa", "thread-2");

        repo.save(&id, &[ConversationMessage::user("first"), ConversationMessage::user("second")])
            .await
            .expect("initial save");
        repo.save(&id, &[ConversationMessage::summary("collapsed")]).await.expect("replace");

        let loaded = repo.load(&id).await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "collapsed");
    }

    #[tokio::test]
    async fn same_thread_id_under_different_tenants_is_isolated() {
        let repo = repository().await;
        let spa = conversation("harbor-spa", "shared-thread");
        let garage = conversation("city-garage", "shared-thread");

        repo.save(&spa, &[ConversationMessage::user("spa secret")]).await.expect("save spa");

        assert!(repo.load(&garage).await.expect("load garage").is_empty());
        assert_eq!(repo.load(&spa).await.expect("load spa").len(), 1);
    }
}
