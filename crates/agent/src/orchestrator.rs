use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use concierge_core::domain::conversation::{ConversationId, ConversationMessage, ToolCallRef};
use concierge_core::domain::tenant::TenantContext;
use concierge_core::errors::OrchestrationError;

use crate::guardrails::{GuardrailDecision, GuardrailPolicy, ToolInvocation};
use crate::llm::{ModelReply, ModelRequest};
use crate::memory::MemoryWindow;
use crate::resilience::ResilientModelClient;
use crate::tools::ToolRegistry;

pub const NEED_MORE_INFORMATION_REPLY: &str = "I need a little more information to help with \
     that. Could you tell me more about what you are looking for?";
pub const DEGRADED_REPLY: &str = "Thanks for your message. Our assistant is temporarily \
     unavailable, so a member of our team will follow up with you shortly.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered,
    NeedMoreInformation,
    Degraded,
}

/// One executed tool call and what it produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentTurn {
    pub reply: String,
    pub outcome: TurnOutcome,
    pub model_calls: u32,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug)]
enum AgentState {
    AwaitingModel,
    ExecutingTool(ToolCallRef),
    Done(String),
    Aborted,
}

impl AgentState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Aborted)
    }
}

/// Bounded tool-calling loop. Every turn ends after at most `max_iterations`
/// model calls, summarization of old history included, with an answer, a
/// fixed follow-up question, or an error.
pub struct ToolOrchestrator {
    model: ResilientModelClient,
    memory: Arc<MemoryWindow>,
    registry: Arc<ToolRegistry>,
    guardrails: GuardrailPolicy,
    max_iterations: u32,
}

impl ToolOrchestrator {
    pub fn new(
        model: ResilientModelClient,
        memory: Arc<MemoryWindow>,
        registry: Arc<ToolRegistry>,
        max_iterations: u32,
    ) -> Self {
        Self {
            model,
            memory,
            registry,
            guardrails: GuardrailPolicy::default(),
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub async fn run(
        &self,
        tenant: &TenantContext,
        conversation: &ConversationId,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentTurn, OrchestrationError> {
        let window = self
            .memory
            .load_context(conversation)
            .await
            .map_err(|error| OrchestrationError::Memory(error.to_string()))?;
        let history = window.messages;
        let definitions = self.registry.definitions_for(tenant);
        let system = ConversationMessage::system(system_prompt(tenant));

        let mut turn = vec![ConversationMessage::user(query)];
        let mut tool_calls = Vec::new();
        // A summary call made while loading history spends the same budget.
        let mut model_calls = window.model_calls;
        let mut state = AgentState::AwaitingModel;

        loop {
            if !state.is_terminal() && cancel.is_cancelled() {
                info!(
                    event_name = "agent.turn.cancelled",
                    tenant_id = %tenant.id(),
                    conversation_id = %conversation.thread_id,
                    model_calls,
                    "agent turn cancelled by caller"
                );
                return Err(OrchestrationError::Cancelled { model_calls });
            }

            state = match state {
                AgentState::AwaitingModel if model_calls >= self.max_iterations => {
                    AgentState::Aborted
                }
                AgentState::AwaitingModel => {
                    model_calls += 1;
                    let mut messages = Vec::with_capacity(history.len() + turn.len() + 1);
                    messages.push(system.clone());
                    messages.extend(history.iter().cloned());
                    messages.extend(turn.iter().cloned());
                    let request = ModelRequest::new(messages).with_tools(definitions.clone());

                    match self.model.complete(request).await {
                        Ok(ModelReply::Text(text)) => AgentState::Done(text.trim().to_string()),
                        Ok(ModelReply::ToolCall { id, name, arguments }) => {
                            let decision = self.guardrails.evaluate(
                                tenant,
                                ToolInvocation { name: &name, arguments: &arguments },
                                &self.registry,
                            );
                            if let GuardrailDecision::Deny { reason_code } = decision {
                                warn!(
                                    event_name = "agent.tool.denied",
                                    tenant_id = %tenant.id(),
                                    conversation_id = %conversation.thread_id,
                                    tool = %name,
                                    reason_code,
                                    "model requested a tool outside policy"
                                );
                                self.persist(conversation, turn).await?;
                                return Err(OrchestrationError::ToolNotPermitted {
                                    tool: name,
                                    reason_code,
                                });
                            }
                            if model_calls >= self.max_iterations {
                                AgentState::Aborted
                            } else {
                                AgentState::ExecutingTool(ToolCallRef { id, name, arguments })
                            }
                        }
                        Err(error) => {
                            warn!(
                                event_name = "agent.turn.degraded",
                                tenant_id = %tenant.id(),
                                conversation_id = %conversation.thread_id,
                                model_calls,
                                error = %error,
                                "model unavailable during agent turn"
                            );
                            turn.push(ConversationMessage::assistant(DEGRADED_REPLY));
                            self.persist(conversation, turn).await?;
                            return Ok(AgentTurn {
                                reply: DEGRADED_REPLY.to_string(),
                                outcome: TurnOutcome::Degraded,
                                model_calls,
                                tool_calls,
                            });
                        }
                    }
                }
                AgentState::ExecutingTool(call) => {
                    let outcome = match self.registry.get(&call.name) {
                        Some(tool) => tool
                            .execute(tenant, call.arguments.clone())
                            .await
                            .map_err(|error| error.to_string()),
                        None => Err(format!("tool `{}` is not available", call.name)),
                    };
                    debug!(
                        event_name = "agent.tool.executed",
                        tenant_id = %tenant.id(),
                        conversation_id = %conversation.thread_id,
                        tool = %call.name,
                        ok = outcome.is_ok(),
                        "tool call finished"
                    );

                    let content = match &outcome {
                        Ok(value) => value.to_string(),
                        Err(message) => json!({ "error": message }).to_string(),
                    };
                    tool_calls.push(ToolCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        result: outcome.as_ref().ok().cloned(),
                        error: outcome.err(),
                    });
                    turn.push(ConversationMessage::tool_request(call.clone()));
                    turn.push(ConversationMessage::tool_result(call, content));
                    AgentState::AwaitingModel
                }
                AgentState::Done(reply) => {
                    turn.push(ConversationMessage::assistant(reply.clone()));
                    self.persist(conversation, turn).await?;
                    return Ok(self.finish(
                        tenant,
                        conversation,
                        reply,
                        TurnOutcome::Answered,
                        model_calls,
                        tool_calls,
                    ));
                }
                AgentState::Aborted => {
                    turn.push(ConversationMessage::assistant(NEED_MORE_INFORMATION_REPLY));
                    self.persist(conversation, turn).await?;
                    return Ok(self.finish(
                        tenant,
                        conversation,
                        NEED_MORE_INFORMATION_REPLY.to_string(),
                        TurnOutcome::NeedMoreInformation,
                        model_calls,
                        tool_calls,
                    ));
                }
            };
        }
    }

    async fn persist(
        &self,
        conversation: &ConversationId,
        messages: Vec<ConversationMessage>,
    ) -> Result<(), OrchestrationError> {
        self.memory
            .append_all(conversation, messages)
            .await
            .map_err(|error| OrchestrationError::Memory(error.to_string()))
    }

    fn finish(
        &self,
        tenant: &TenantContext,
        conversation: &ConversationId,
        reply: String,
        outcome: TurnOutcome,
        model_calls: u32,
        tool_calls: Vec<ToolCall>,
    ) -> AgentTurn {
        info!(
            event_name = "agent.turn.completed",
            tenant_id = %tenant.id(),
            conversation_id = %conversation.thread_id,
            outcome = ?outcome,
            model_calls,
            tool_calls = tool_calls.len(),
            "agent turn finished"
        );
        AgentTurn { reply, outcome, model_calls, tool_calls }
    }
}

fn system_prompt(tenant: &TenantContext) -> String {
    let tools = if tenant.allowed_tools().is_empty() {
        "none".to_string()
    } else {
        tenant.allowed_tools().iter().cloned().collect::<Vec<_>>().join(", ")
    };
    format!(
        "You are the customer assistant for {name}. Answer the customer's latest message \
         using the conversation so far. Available tools: {tools}. Use a tool whenever the \
         answer depends on records, availability or prices; never state a price that did not \
         come from calculate_price. Keep answers short and do not sign them.",
        name = tenant.display_name(),
    )
}
