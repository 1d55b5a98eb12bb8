use chrono::{DateTime, Utc};
use sqlx::Row;

use concierge_core::domain::tenant::TenantId;

use super::{
    format_timestamp, parse_timestamp, AvailabilityRepository, AvailabilitySlot, RepositoryError,
};
use crate::DbPool;

pub struct SqlAvailabilityRepository {
    pool: DbPool,
}

impl SqlAvailabilityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn add_slot(
        &self,
        tenant_id: &TenantId,
        slot: &AvailabilitySlot,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO availability_slots (tenant_id, service, starts_at, ends_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(&slot.service)
        .bind(format_timestamp(&slot.starts_at))
        .bind(format_timestamp(&slot.ends_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AvailabilityRepository for SqlAvailabilityRepository {
    async fn open_slots(
        &self,
        tenant_id: &TenantId,
        service: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        // Timestamps are stored as fixed-width UTC RFC3339, so text order is time order.
        let rows = sqlx::query(
            r#"
            SELECT service, starts_at, ends_at
            FROM availability_slots
            WHERE tenant_id = ?
              AND lower(service) = lower(?)
              AND starts_at >= ?
              AND starts_at < ?
            ORDER BY starts_at ASC
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(service)
        .bind(format_timestamp(&from))
        .bind(format_timestamp(&until))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(AvailabilitySlot {
                    service: row.try_get("service")?,
                    starts_at: parse_timestamp(&row.try_get::<String, _>("starts_at")?)?,
                    ends_at: parse_timestamp(&row.try_get::<String, _>("ends_at")?)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use concierge_core::domain::tenant::TenantId;

    use super::SqlAvailabilityRepository;
    use crate::connection::connect_in_memory;
    use crate::migrations::run_pending;
    use crate::repositories::{AvailabilityRepository, AvailabilitySlot};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, hour, 0, 0).single().expect("timestamp")
    }

    fn slot(service: &str, day: u32, hour: u32) -> AvailabilitySlot {
        AvailabilitySlot { service: service.to_string(), starts_at: at(day, hour), ends_at: at(day, hour + 1) }
    }

    #[tokio::test]
    async fn open_slots_filters_window_service_and_tenant() {
        let pool = connect_in_memory().await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        let repo = SqlAvailabilityRepository::new(pool);
        let spa = TenantId("harbor-spa".to_string());
        let garage = TenantId("city-garage".to_string());

        repo.add_slot(&spa, &slot("massage", 4, 15)).await.expect("slot");
        repo.add_slot(&spa, &slot("massage", 4, 10)).await.expect("slot");
        repo.add_slot(&spa, &slot("massage", 9, 10)).await.expect("slot outside window");
        repo.add_slot(&spa, &slot("facial", 4, 11)).await.expect("other service");
        repo.add_slot(&garage, &slot("massage", 4, 12)).await.expect("other tenant");

        let slots = repo.open_slots(&spa, "Massage", at(4, 0), at(5, 0)).await.expect("query");

        assert_eq!(slots, vec![slot("massage", 4, 10), slot("massage", 4, 15)]);
    }

    #[tokio::test]
    async fn open_slots_window_end_is_exclusive() {
        let pool = connect_in_memory().await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        let repo = SqlAvailabilityRepository::new(pool);
        let spa = TenantId("harbor-spa".to_string());

        repo.add_slot(&spa, &slot("facial", 6, 9)).await.expect("slot");

        let slots = repo.open_slots(&spa, "facial", at(5, 9), at(6, 9)).await.expect("query");
        assert!(slots.is_empty());
    }
}
