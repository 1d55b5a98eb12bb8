use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use concierge_agent::{CircuitBreaker, CircuitSnapshot, CircuitStatus};
use concierge_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub breaker: Arc<CircuitBreaker>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub model: HealthCheck,
    pub circuit: CircuitSnapshot,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// `503` only when the database is unreachable. An open circuit still
/// answers `200`: inbound messages are acknowledged while the model is away.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let circuit = state.breaker.snapshot();
    let model = model_check(&circuit);
    let database_ready = database.status == "ready";
    let ready = database_ready && model.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "concierge-server runtime initialized".to_string(),
        },
        database,
        model,
        circuit,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if database_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn model_check(circuit: &CircuitSnapshot) -> HealthCheck {
    match circuit.status {
        CircuitStatus::Closed => {
            HealthCheck { status: "ready", detail: "model endpoint circuit closed".to_string() }
        }
        CircuitStatus::HalfOpen => HealthCheck {
            status: "degraded",
            detail: "model endpoint circuit half-open, trial call in progress".to_string(),
        },
        CircuitStatus::Open => HealthCheck {
            status: "degraded",
            detail: format!(
                "model endpoint circuit open since {} after {} consecutive failures",
                circuit.last_transition_at.to_rfc3339(),
                circuit.consecutive_failures
            ),
        },
    }
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use concierge_agent::{BreakerPolicy, CircuitBreaker};
    use concierge_db::connect_in_memory;

    use crate::health::{health, HealthState};

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new("http://model.test/v1/chat/completions", BreakerPolicy::default()))
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_reachable_and_circuit_closed() {
        let pool = connect_in_memory().await.expect("pool should connect");

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), breaker: breaker() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.model.status, "ready");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_reports_degraded_model_while_circuit_open() {
        let pool = connect_in_memory().await.expect("pool should connect");
        let breaker = breaker();
        for _ in 0..5 {
            breaker.try_acquire().expect("admitted").fail();
        }

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), breaker })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.model.status, "degraded");
        assert_eq!(payload.circuit.consecutive_failures, 5);

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_in_memory().await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool, breaker: breaker() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
