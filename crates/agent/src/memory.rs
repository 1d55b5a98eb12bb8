use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use concierge_core::domain::conversation::{ConversationId, ConversationMessage, MessageRole};
use concierge_db::{ConversationRepository, RepositoryError};

use crate::llm::{ModelReply, ModelRequest};
use crate::resilience::ResilientModelClient;

const LOCK_TABLE_SOFT_LIMIT: usize = 1_024;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("conversation store failure: {0}")]
    Store(#[from] RepositoryError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContextWindow {
    pub messages: Vec<ConversationMessage>,
    pub model_calls: u32,
}

/// Bounded view over a conversation. At most `cap` verbatim messages are kept;
/// anything older is folded into a single summary message at the front.
pub struct MemoryWindow {
    store: Arc<dyn ConversationRepository>,
    model: ResilientModelClient,
    cap: usize,
    locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryWindow {
    pub fn new(store: Arc<dyn ConversationRepository>, model: ResilientModelClient, cap: usize) -> Self {
        Self { store, model, cap: cap.max(1), locks: Mutex::new(HashMap::new()) }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Returns at most `cap + 1` messages. Summarization failures degrade to
    /// the most recent `cap` messages; only store failures are errors.
    pub async fn get_context(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<ConversationMessage>, MemoryError> {
        self.load_context(id).await.map(|window| window.messages)
    }

    /// Like [`MemoryWindow::get_context`], but also reports how many model
    /// calls building the window took (0 or 1) so callers can charge them
    /// against their own budget.
    pub async fn load_context(&self, id: &ConversationId) -> Result<ContextWindow, MemoryError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let history = self.store.load(id).await?;
        let verbatim = history.iter().filter(|message| !message.is_summary()).count();
        if verbatim <= self.cap && history.len() <= self.cap + 1 {
            return Ok(ContextWindow { messages: history, model_calls: 0 });
        }

        let split = split_point(&history, self.cap);
        let (prefix, tail) = history.split_at(split);

        match self.summarize(id, prefix).await {
            Some(summary) => {
                let mut collapsed = Vec::with_capacity(tail.len() + 1);
                collapsed.push(ConversationMessage::summary(summary));
                collapsed.extend_from_slice(tail);
                self.store.save(id, &collapsed).await?;
                info!(
                    event_name = "memory.window.summarized",
                    tenant_id = %id.tenant_id,
                    conversation_id = %id.thread_id,
                    summarized = prefix.len(),
                    retained = tail.len(),
                    "conversation prefix collapsed into summary"
                );
                Ok(ContextWindow { messages: collapsed, model_calls: 1 })
            }
            None => Ok(ContextWindow { messages: tail.to_vec(), model_calls: 1 }),
        }
    }

    pub async fn append(
        &self,
        id: &ConversationId,
        message: ConversationMessage,
    ) -> Result<(), MemoryError> {
        self.append_all(id, vec![message]).await
    }

    pub async fn append_all(
        &self,
        id: &ConversationId,
        messages: Vec<ConversationMessage>,
    ) -> Result<(), MemoryError> {
        if messages.is_empty() {
            return Ok(());
        }
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut history = self.store.load(id).await?;
        history.extend(messages);
        self.store.save(id, &history).await?;
        debug!(
            event_name = "memory.window.appended",
            tenant_id = %id.tenant_id,
            conversation_id = %id.thread_id,
            total = history.len(),
            "conversation history persisted"
        );
        Ok(())
    }

    async fn summarize(&self, id: &ConversationId, prefix: &[ConversationMessage]) -> Option<String> {
        let request = ModelRequest::new(vec![
            ConversationMessage::system(
                "Summarize the earlier part of this customer conversation in a few sentences. \
                 Keep names, dates, booking references, prices and open questions. \
                 Return only the summary.",
            ),
            ConversationMessage::user(transcript(prefix)),
        ]);

        match self.model.complete(request).await {
            Ok(ModelReply::Text(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                warn!(
                    event_name = "memory.window.summary_unusable",
                    tenant_id = %id.tenant_id,
                    conversation_id = %id.thread_id,
                    "summary reply unusable, returning recent messages only"
                );
                None
            }
            Err(error) => {
                warn!(
                    event_name = "memory.window.summary_failed",
                    tenant_id = %id.tenant_id,
                    conversation_id = %id.thread_id,
                    error = %error,
                    "summarization failed, returning recent messages only"
                );
                None
            }
        }
    }

    fn lock_for(&self, id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if locks.len() > LOCK_TABLE_SOFT_LIMIT {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(id.clone()).or_default().clone()
    }
}

/// Index where the retained tail begins: the last `cap` messages, moved
/// forward past tool results whose request would otherwise be summarized away.
fn split_point(history: &[ConversationMessage], cap: usize) -> usize {
    let mut split = history.len().saturating_sub(cap);
    while split < history.len() && history[split].role == MessageRole::Tool {
        split += 1;
    }
    split
}

fn transcript(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(|message| match (&message.tool_call, message.role) {
            _ if message.is_summary() => format!("Earlier summary: {}", message.content),
            (Some(call), MessageRole::Assistant) => {
                format!("assistant requested {} with {}", call.name, call.arguments)
            }
            (Some(call), MessageRole::Tool) => format!("{} returned: {}", call.name, message.content),
            (_, role) => format!("{}: {}", role.as_str(), message.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
