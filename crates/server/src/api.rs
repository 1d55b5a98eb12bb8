use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use concierge_agent::{AgentReply, AgentRuntime, InboundMessage};
use concierge_core::errors::{ApplicationError, InterfaceError};
use concierge_core::tenants::TenantConfigSource;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<AgentRuntime>,
    pub tenants: Arc<dyn TenantConfigSource>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct MessageResponse {
    pub correlation_id: String,
    #[serde(flatten)]
    pub reply: AgentReply,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/v1/tenants/{tenant_id}/conversations/{conversation_id}/messages",
            post(post_message),
        )
        .with_state(state)
}

/// Runs the turn on its own task. Dropping this future (client went away)
/// cancels the token, which the runtime observes between model calls.
pub async fn post_message(
    State(state): State<ApiState>,
    Path((tenant_id, conversation_id)): Path<(String, String)>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let Json(request) = payload.map_err(|rejection| {
        ApiError::new(InterfaceError::BadRequest {
            message: rejection.body_text(),
            correlation_id: correlation_id.clone(),
        })
    })?;

    let tenant = state
        .tenants
        .load_tenant_context(&tenant_id)
        .await
        .map_err(|error| ApiError::from_application(error.into(), &correlation_id))?;

    info!(
        event_name = "api.message.received",
        correlation_id = %correlation_id,
        tenant_id = %tenant.id(),
        conversation_id = %conversation_id,
        "inbound message accepted"
    );

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let runtime = state.runtime.clone();
    let inbound = InboundMessage::new(conversation_id, request.text);
    let turn =
        tokio::spawn(async move { runtime.handle_message(&tenant, inbound, cancel).await });

    let reply = match turn.await {
        Ok(Ok(reply)) => reply,
        Ok(Err(error)) => return Err(ApiError::from_application(error.into(), &correlation_id)),
        Err(join_error) => {
            return Err(ApiError::new(InterfaceError::Internal {
                message: format!("message task failed: {join_error}"),
                correlation_id,
            }))
        }
    };

    info!(
        event_name = "api.message.completed",
        correlation_id = %correlation_id,
        tenant_id = %reply.tenant_id,
        conversation_id = %reply.conversation_id,
        route = ?reply.route,
        "message handled"
    );
    Ok(Json(MessageResponse { correlation_id, reply }))
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    pub fn new(error: InterfaceError) -> Self {
        Self(error)
    }

    fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self.0 {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InterfaceError::Unprocessable { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable")
            }
            InterfaceError::BadGateway { .. } => (StatusCode::BAD_GATEWAY, "bad_gateway"),
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        warn!(
            event_name = "api.message.failed",
            correlation_id = %self.0.correlation_id(),
            status = status.as_u16(),
            error = %self.0,
            "request failed"
        );

        // Server-side details stay in the log.
        let detail = match self.0 {
            InterfaceError::BadRequest { ref message, .. }
            | InterfaceError::NotFound { ref message, .. }
            | InterfaceError::Unprocessable { ref message, .. } => Some(message.clone()),
            _ => None,
        };
        let body = json!({
            "error": kind,
            "message": self.0.user_message(),
            "detail": detail,
            "correlation_id": self.0.correlation_id(),
        });
        (status, Json(body)).into_response()
    }
}
