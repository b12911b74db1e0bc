use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{ContextConfig, RetrievalConfig};
use crate::database::ConversationStore;
use crate::models::conversation::{ContextMessage, ConversationContext, MessageRole};
use crate::services::commands::is_command;
use crate::services::knowledge_store::KnowledgeStore;
use crate::services::query_analyzer::QueryAnalyzer;
use crate::services::vector_index::SearchHit;
use crate::utils::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub max_context_messages: usize,
    pub command_history_limit: usize,
    pub max_topics: usize,
    pub knowledge_top_k: usize,
}

impl ContextLimits {
    pub fn new(context: &ContextConfig, retrieval: &RetrievalConfig) -> Self {
        Self {
            max_context_messages: context.max_context_messages.max(1),
            command_history_limit: context.command_history_limit,
            max_topics: context.max_topics,
            knowledge_top_k: retrieval.knowledge_top_k,
        }
    }
}

/// Read-only view handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct RelevantContext {
    pub messages: Vec<ContextMessage>,
    pub documents: Vec<SearchHit>,
    pub command_history: Vec<String>,
}

enum ContextState {
    Uninitialized { requested: Option<Uuid> },
    Ready { conversation_id: Uuid, context: ConversationContext },
}

/// Bounded, persisted state of one bot+user conversation.
///
/// Every mutation reloads the stored blob, applies the change and writes the
/// whole blob back. Two turns racing on the same conversation would lose one
/// write; callers keep at most one turn in flight per conversation.
pub struct ContextManager {
    conversations: Arc<dyn ConversationStore>,
    knowledge: Arc<KnowledgeStore>,
    limits: ContextLimits,
    bot_id: i64,
    user_id: i64,
    state: ContextState,
}

impl ContextManager {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        knowledge: Arc<KnowledgeStore>,
        limits: ContextLimits,
        bot_id: i64,
        user_id: i64,
        conversation_id: Option<Uuid>,
    ) -> Self {
        Self {
            conversations,
            knowledge,
            limits,
            bot_id,
            user_id,
            state: ContextState::Uninitialized { requested: conversation_id },
        }
    }

    /// Load the stored state, or start an empty one. The row itself is
    /// written on the first mutation.
    pub async fn initialize(&mut self) -> Result<Uuid, CoreError> {
        let requested = match &self.state {
            ContextState::Ready { conversation_id, .. } => return Ok(*conversation_id),
            ContextState::Uninitialized { requested } => *requested,
        };

        let (conversation_id, context) = match requested {
            Some(id) => (id, self.load(id).await?.unwrap_or_default()),
            None => {
                let id = Uuid::new_v4();
                info!("New conversation {} for bot {} and user {}", id, self.bot_id, self.user_id);
                (id, ConversationContext::default())
            }
        };

        debug!(
            "Conversation {} ready with {} messages",
            conversation_id,
            context.messages.len()
        );
        self.state = ContextState::Ready { conversation_id, context };
        Ok(conversation_id)
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        match &self.state {
            ContextState::Ready { conversation_id, .. } => Some(*conversation_id),
            ContextState::Uninitialized { .. } => None,
        }
    }

    pub fn snapshot(&self) -> Option<&ConversationContext> {
        match &self.state {
            ContextState::Ready { context, .. } => Some(context),
            ContextState::Uninitialized { .. } => None,
        }
    }

    /// Append a message. A user message refreshes the relevant documents
    /// with a bot-scoped knowledge search; a command only lands in the
    /// command history.
    pub async fn add_message(
        &mut self,
        content: &str,
        role: MessageRole,
        metadata: Option<Value>,
    ) -> Result<(), CoreError> {
        let documents = if role == MessageRole::User && !is_command(content) {
            let hits = self
                .knowledge
                .search(self.bot_id, content, self.limits.knowledge_top_k)
                .await?;
            Some(hits.into_iter().map(|h| h.source_id).collect())
        } else {
            None
        };
        self.append(content, role, metadata, documents).await
    }

    /// Append a user message whose knowledge hits are already known.
    pub async fn add_user_message_with_documents(
        &mut self,
        content: &str,
        metadata: Option<Value>,
        document_ids: Vec<String>,
    ) -> Result<(), CoreError> {
        self.append(content, MessageRole::User, metadata, Some(document_ids)).await
    }

    async fn append(
        &mut self,
        content: &str,
        role: MessageRole,
        metadata: Option<Value>,
        document_ids: Option<Vec<String>>,
    ) -> Result<(), CoreError> {
        let (conversation_id, mut context) = self.reload().await?;
        let limits = self.limits;

        context.messages.push(ContextMessage {
            role,
            content: content.to_string(),
            metadata,
            timestamp: Utc::now(),
        });
        if context.messages.len() > limits.max_context_messages {
            let overflow = context.messages.len() - limits.max_context_messages;
            context.messages.drain(..overflow);
        }

        if role == MessageRole::User {
            if is_command(content) {
                let history = &mut context.metadata.command_history;
                history.push(content.trim().to_string());
                if history.len() > limits.command_history_limit {
                    let overflow = history.len() - limits.command_history_limit;
                    history.drain(..overflow);
                }
            } else {
                if let Some(ids) = document_ids {
                    context.metadata.relevant_document_ids = ids;
                }
                context.metadata.last_topics = QueryAnalyzer::extract_topics(content, limits.max_topics);
            }
        }
        context.metadata.last_updated = Some(Utc::now());

        self.persist(conversation_id, context).await
    }

    /// Snapshot of recent messages and command history plus a fresh
    /// knowledge search for `query`. Nothing is written.
    pub async fn get_relevant_context(&self, query: &str) -> Result<RelevantContext, CoreError> {
        let context = self.ready_context()?;
        let documents = if query.trim().is_empty() {
            Vec::new()
        } else {
            self.knowledge
                .search(self.bot_id, query, self.limits.knowledge_top_k)
                .await?
        };

        Ok(RelevantContext {
            messages: context.messages.clone(),
            documents,
            command_history: context.metadata.command_history.clone(),
        })
    }

    /// Reset to an empty state under the same conversation id.
    pub async fn clear_context(&mut self) -> Result<(), CoreError> {
        let conversation_id = self.ready_id()?;
        info!("Clearing context of conversation {}", conversation_id);
        self.persist(conversation_id, ConversationContext::default()).await
    }

    async fn load(&self, conversation_id: Uuid) -> Result<Option<ConversationContext>, CoreError> {
        let stored = self
            .conversations
            .load_conversation(conversation_id)
            .await
            .map_err(CoreError::persistence)?;

        match stored {
            Some(row) if row.bot_id != self.bot_id || row.user_id != self.user_id => Err(
                CoreError::invalid_request(format!(
                    "conversation {} belongs to another bot or user",
                    conversation_id
                )),
            ),
            Some(row) => Ok(Some(row.state.0)),
            None => Ok(None),
        }
    }

    /// Latest persisted state, falling back to memory before the first write.
    async fn reload(&mut self) -> Result<(Uuid, ConversationContext), CoreError> {
        let conversation_id = self.ready_id()?;
        match self.load(conversation_id).await? {
            Some(stored) => Ok((conversation_id, stored)),
            None => Ok((conversation_id, self.ready_context()?.clone())),
        }
    }

    async fn persist(&mut self, conversation_id: Uuid, context: ConversationContext) -> Result<(), CoreError> {
        self.conversations
            .save_conversation(conversation_id, self.bot_id, self.user_id, &context)
            .await
            .map_err(CoreError::persistence)?;
        self.state = ContextState::Ready { conversation_id, context };
        Ok(())
    }

    fn ready_id(&self) -> Result<Uuid, CoreError> {
        self.conversation_id()
            .ok_or_else(|| CoreError::validation("conversation context is not initialized"))
    }

    fn ready_context(&self) -> Result<&ConversationContext, CoreError> {
        self.snapshot()
            .ok_or_else(|| CoreError::validation("conversation context is not initialized"))
    }
}
