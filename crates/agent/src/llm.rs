use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use concierge_core::config::LlmConfig;
use concierge_core::domain::conversation::{ConversationMessage, MessageRole};
use concierge_core::errors::EndpointError;

/// Tool advertised to the model: name, description and JSON-schema parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Schema the model's text answer must conform to.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseFormat {
    pub name: String,
    pub schema: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelRequest {
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolDefinition>,
    pub response_format: Option<ResponseFormat>,
}

impl ModelRequest {
    pub fn new(messages: Vec<ConversationMessage>) -> Self {
        Self { messages, ..Self::default() }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// A model answers with either final text or exactly one tool request.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelReply {
    Text(String),
    ToolCall { id: String, name: String, arguments: Value },
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Identifies the endpoint; circuit state is keyed by it.
    fn endpoint(&self) -> &str;

    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, EndpointError>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (OpenAI, Ollama).
pub struct HttpChatClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl HttpChatClient {
    pub fn new(base_url: &str, model: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, EndpointError> {
        // The resilient wrapper owns the per-call timeout; this one only bounds
        // a connection that never answers at all.
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2).max(1)))
            .build()
            .map_err(|error| EndpointError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.endpoint_base()),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn request_body(&self, request: &ModelRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
        });

        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
        }

        if let Some(format) = &request.response_format {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": format.name, "schema": format.schema, "strict": true }
            });
        }

        body
    }
}

#[async_trait]
impl LlmClient for HttpChatClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, EndpointError> {
        let mut builder = self.client.post(&self.endpoint).json(&self.request_body(&request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                EndpointError::Timeout { after_ms: 0 }
            } else {
                EndpointError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EndpointError::Status { status: status.as_u16(), body: truncate(&body, 512) });
        }

        let payload: Value = response.json().await.map_err(|error| {
            EndpointError::InvalidResponse(format!("failed to decode completion: {error}"))
        })?;
        parse_completion(&payload)
    }
}

fn wire_message(message: &ConversationMessage) -> Value {
    match (message.role, &message.tool_call) {
        (MessageRole::Assistant, Some(call)) => json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": [{
                "id": call.id,
                "type": "function",
                "function": { "name": call.name, "arguments": call.arguments.to_string() },
            }],
        }),
        (MessageRole::Tool, Some(call)) => json!({
            "role": "tool",
            "tool_call_id": call.id,
            "content": message.content,
        }),
        (role, _) => json!({ "role": role.as_str(), "content": message.content }),
    }
}

pub(crate) fn parse_completion(payload: &Value) -> Result<ModelReply, EndpointError> {
    let message = payload
        .pointer("/choices/0/message")
        .ok_or_else(|| EndpointError::InvalidResponse("completion has no choices".to_string()))?;

    if let Some(call) = message.pointer("/tool_calls/0") {
        let name = call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .ok_or_else(|| EndpointError::InvalidResponse("tool call without name".to_string()))?;
        let arguments = match call.pointer("/function/arguments") {
            Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
            Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|error| {
                EndpointError::InvalidResponse(format!("tool arguments are not JSON: {error}"))
            })?,
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => json!({}),
        };
        let id = call.get("id").and_then(Value::as_str).unwrap_or("call_0").to_string();
        return Ok(ModelReply::ToolCall { id, name: name.to_string(), arguments });
    }

    let content = message.get("content").and_then(Value::as_str).unwrap_or_default();
    Ok(ModelReply::Text(content.to_string()))
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
