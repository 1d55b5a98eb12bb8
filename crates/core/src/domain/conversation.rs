use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::tenant::TenantId;

/// A conversation is always addressed through its owning tenant, so two
/// tenants using the same thread identifier never share history.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId {
    pub tenant_id: TenantId,
    pub thread_id: String,
}

impl ConversationId {
    pub fn new(tenant_id: TenantId, thread_id: impl Into<String>) -> Self {
        Self { tenant_id, thread_id: thread_id.into() }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.thread_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// Links an assistant tool request to the tool-role message carrying its
/// result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRef>,
    #[serde(default)]
    pub summary: bool,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), tool_call: None, summary: false, created_at: Utc::now() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// Assistant turn that requested a tool instead of answering.
    pub fn tool_request(call: ToolCallRef) -> Self {
        Self { tool_call: Some(call), ..Self::with_role(MessageRole::Assistant, String::new()) }
    }

    pub fn tool_result(call: ToolCallRef, content: impl Into<String>) -> Self {
        Self { tool_call: Some(call), ..Self::with_role(MessageRole::Tool, content) }
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self { summary: true, ..Self::with_role(MessageRole::System, content) }
    }

    pub fn is_summary(&self) -> bool {
        self.summary && self.role == MessageRole::System
    }
}
