use sqlx::Row;

use concierge_core::domain::tenant::TenantId;

use super::{format_timestamp, parse_timestamp, RecordRepository, RepositoryError, TenantRecord};
use crate::DbPool;

pub struct SqlRecordRepository {
    pool: DbPool,
}

impl SqlRecordRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a record. Records are owned by the tenant's own
    /// systems; this exists for imports and the `tenant` CLI command.
    pub async fn upsert_record(
        &self,
        tenant_id: &TenantId,
        record: &TenantRecord,
    ) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO tenant_records (tenant_id, record_id, kind, payload_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, record_id) DO UPDATE SET
                kind = excluded.kind,
                payload_json = excluded.payload_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(&record.record_id)
        .bind(&record.kind)
        .bind(payload)
        .bind(format_timestamp(&record.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count_for_tenant(&self, tenant_id: &TenantId) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM tenant_records WHERE tenant_id = ?")
            .bind(tenant_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }
}

#[async_trait::async_trait]
impl RecordRepository for SqlRecordRepository {
    async fn find_record(
        &self,
        tenant_id: &TenantId,
        record_id: &str,
    ) -> Result<Option<TenantRecord>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT record_id, kind, payload_json, updated_at
            FROM tenant_records
            WHERE tenant_id = ? AND record_id = ?
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload_raw = row.try_get::<String, _>("payload_json")?;
        let payload = serde_json::from_str(&payload_raw)
            .map_err(|error| RepositoryError::Decode(format!("invalid record payload: {error}")))?;

        Ok(Some(TenantRecord {
            record_id: row.try_get("record_id")?,
            kind: row.try_get("kind")?,
            payload,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use concierge_core::domain::tenant::TenantId;
    use serde_json::json;

    use super::SqlRecordRepository;
    use crate::connection::connect_in_memory;
    use crate::migrations::run_pending;
    use crate::repositories::{RecordRepository, TenantRecord};

    fn booking() -> TenantRecord {
        TenantRecord {
            record_id: "BK-1042".to_string(),
            kind: "booking".to_string(),
            payload: json!({ "service": "massage", "guest": "R. Alvarez", "status": "confirmed" }),
            updated_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).single().expect("timestamp"),
        }
    }

    #[tokio::test]
    async fn upsert_then_find_returns_record_for_owning_tenant_only() {
        let pool = connect_in_memory().await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        let repo = SqlRecordRepository::new(pool);
        let spa = TenantId("harbor-spa".to_string());
        let garage = TenantId("city-garage".to_string());

        repo.upsert_record(&spa, &booking()).await.expect("upsert");

        assert_eq!(repo.find_record(&spa, "BK-1042").await.expect("find"), Some(booking()));
        assert_eq!(repo.find_record(&garage, "BK-1042").await.expect("find other"), None);
        assert_eq!(repo.count_for_tenant(&spa).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_payload() {
        let pool = connect_in_memory().await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        let repo = SqlRecordRepository::new(pool);
        let spa = TenantId("harbor-spa".to_string());

        repo.upsert_record(&spa, &booking()).await.expect("first upsert");
        let mut cancelled = booking();
        cancelled.payload = json!({ "status": "cancelled" });
        repo.upsert_record(&spa, &cancelled).await.expect("second upsert");

        let found = repo.find_record(&spa, "BK-1042").await.expect("find").expect("present");
        assert_eq!(found.payload["status"], "cancelled");
        assert_eq!(repo.count_for_tenant(&spa).await.expect("count"), 1);
    }
}
