use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use concierge_core::config::AgentConfig;
use concierge_core::domain::classification::{Category, ClassificationResult};
use concierge_core::domain::conversation::ConversationId;
use concierge_core::domain::tenant::TenantContext;
use concierge_core::errors::{ApplicationError, ClassificationError, OrchestrationError};
use concierge_db::ConversationRepository;

use crate::classifier::Classifier;
use crate::memory::MemoryWindow;
use crate::orchestrator::{ToolCall, ToolOrchestrator, TurnOutcome};
use crate::resilience::ResilientModelClient;
use crate::responder::ResponseGenerator;
use crate::tools::ToolRegistry;

pub const ACKNOWLEDGEMENT_REPLY: &str =
    "Thank you for your message. We have received it and will get back to you shortly.";

const MAX_MESSAGE_CHARS: usize = 8_000;
const MAX_THREAD_ID_CHARS: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub thread_id: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(thread_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { thread_id: thread_id.into(), text: text.into() }
    }

    fn validate(&self) -> Result<(), RuntimeError> {
        let thread = self.thread_id.trim();
        if thread.is_empty() || thread.chars().count() > MAX_THREAD_ID_CHARS {
            return Err(RuntimeError::InvalidInput(format!(
                "conversation id must be 1 to {MAX_THREAD_ID_CHARS} characters"
            )));
        }
        if !thread.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')) {
            return Err(RuntimeError::InvalidInput(
                "conversation id may only contain letters, digits, `-`, `_`, `.` and `:`".to_string(),
            ));
        }
        if self.text.trim().is_empty() {
            return Err(RuntimeError::InvalidInput("message text is empty".to_string()));
        }
        if self.text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(RuntimeError::InvalidInput(format!(
                "message text exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Spam: nothing is sent.
    Suppressed,
    Template,
    Agent,
    /// Classification was unavailable; a fixed acknowledgement is sent.
    Acknowledged,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentReply {
    pub tenant_id: String,
    pub conversation_id: String,
    pub route: Route,
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TurnOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Error, PartialEq)]
pub enum RuntimeError {
    #[error("invalid message: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Classification(ClassificationError),
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
    #[error("request cancelled while waiting for capacity")]
    Cancelled,
    #[error("agent runtime is shutting down")]
    Closed,
}

impl From<RuntimeError> for ApplicationError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::InvalidInput(message) => Self::InvalidRequest(message),
            RuntimeError::Classification(error) => error.into(),
            RuntimeError::Orchestration(error) => error.into(),
            RuntimeError::Cancelled | RuntimeError::Closed => Self::Unavailable(error.to_string()),
        }
    }
}

/// Entry point of the pipeline: classify, then route to the template
/// responder or the tool-calling agent.
pub struct AgentRuntime {
    classifier: Classifier,
    responder: ResponseGenerator,
    orchestrator: ToolOrchestrator,
    permits: Arc<Semaphore>,
}

impl AgentRuntime {
    pub fn new(
        model: ResilientModelClient,
        conversations: Arc<dyn ConversationRepository>,
        registry: Arc<ToolRegistry>,
        config: &AgentConfig,
    ) -> Self {
        let memory = Arc::new(MemoryWindow::new(conversations, model.clone(), config.memory_cap));
        Self {
            classifier: Classifier::new(model.clone()),
            responder: ResponseGenerator::new(model.clone()),
            orchestrator: ToolOrchestrator::new(model, memory, registry, config.max_iterations),
            permits: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn close(&self) {
        self.permits.close();
    }

    pub async fn handle_message(
        &self,
        tenant: &TenantContext,
        inbound: InboundMessage,
        cancel: CancellationToken,
    ) -> Result<AgentReply, RuntimeError> {
        inbound.validate()?;

        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit.map_err(|_| RuntimeError::Closed)?,
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
        };

        let conversation = ConversationId::new(tenant.id().clone(), inbound.thread_id.trim());
        let mut reply = AgentReply {
            tenant_id: tenant.id().to_string(),
            conversation_id: conversation.thread_id.clone(),
            route: Route::Acknowledged,
            reply: None,
            classification: None,
            outcome: None,
            tool_calls: Vec::new(),
        };

        let classification = match self.classifier.classify(&inbound.text, tenant).await {
            Ok(classification) => classification,
            Err(ClassificationError::Unavailable(error)) => {
                warn!(
                    event_name = "runtime.route.acknowledged",
                    tenant_id = %tenant.id(),
                    conversation_id = %conversation.thread_id,
                    error = %error,
                    "classification unavailable, sending acknowledgement"
                );
                reply.reply = Some(format!("{ACKNOWLEDGEMENT_REPLY}\n\n{}", tenant.signature()));
                return Ok(reply);
            }
            Err(error) => return Err(RuntimeError::Classification(error)),
        };

        let category = classification.category;
        reply.route = match category {
            Category::Spam => Route::Suppressed,
            _ if tenant.routes_to_agent(category) => Route::Agent,
            _ => Route::Template,
        };

        match reply.route {
            Route::Suppressed => {}
            Route::Template => {
                reply.reply = Some(self.responder.generate(&classification, tenant).await);
            }
            Route::Agent => {
                let turn = self.orchestrator.run(tenant, &conversation, &inbound.text, &cancel).await?;
                reply.reply = Some(turn.reply);
                reply.outcome = Some(turn.outcome);
                reply.tool_calls = turn.tool_calls;
            }
            Route::Acknowledged => {}
        }

        info!(
            event_name = "runtime.message.handled",
            tenant_id = %tenant.id(),
            conversation_id = %conversation.thread_id,
            category = %category,
            route = ?reply.route,
            "inbound message handled"
        );
        reply.classification = Some(classification);
        Ok(reply)
    }
}
