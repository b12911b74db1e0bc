use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::database::{ChatLogMessage, MessageLog};
use crate::models::conversation::MessageRole;
use crate::models::metadata::{ContextType, EmbeddingMetadata, Provenance};
use crate::services::vector_index::{SearchHit, VectorIndex};
use crate::utils::error::CoreError;

/// One line of the history handed to the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
    /// Set for entries recalled from other conversations
    pub recalled_from: Option<ContextType>,
}

impl HistoryEntry {
    pub fn from_dialogue(message: &ChatLogMessage) -> Self {
        let role = if message.sender_is_bot {
            MessageRole::Assistant
        } else {
            MessageRole::User
        };
        Self {
            role,
            content: message.content.clone(),
            recalled_from: None,
        }
    }

    pub fn from_recall(hit: &SearchHit) -> Self {
        Self {
            role: MessageRole::User,
            content: hit.content.clone(),
            recalled_from: Some(hit.metadata.context_type.unwrap_or(ContextType::Direct)),
        }
    }
}

/// Recalled memories first, then the direct dialogue in order.
/// Nothing is deduplicated.
pub fn merge_history(recall: &[SearchHit], dialogue: &[ChatLogMessage]) -> Vec<HistoryEntry> {
    recall
        .iter()
        .map(HistoryEntry::from_recall)
        .chain(dialogue.iter().map(HistoryEntry::from_dialogue))
        .collect()
}

/// Metadata attached to a user-authored chat message when it is embedded.
pub fn message_metadata(message: &ChatLogMessage) -> EmbeddingMetadata {
    EmbeddingMetadata {
        user_id: Some(message.sender_id),
        sender_id: Some(message.sender_id),
        receiver_id: Some(message.destination_id),
        context_type: Some(message.context_type()),
        is_user_message: Some(true),
        provenance: Some(Provenance::ChatMessage),
        message_id: Some(message.id.to_string()),
        created_at: Some(message.created_at),
        ..Default::default()
    }
}

/// Loads the user's recent messages to other destinations and indexes the
/// ones that are not embedded yet, so recall can find them.
pub struct RecallIndexer<'a> {
    messages: &'a dyn MessageLog,
    index: &'a VectorIndex,
    config: &'a RetrievalConfig,
}

impl<'a> RecallIndexer<'a> {
    pub fn new(messages: &'a dyn MessageLog, index: &'a VectorIndex, config: &'a RetrievalConfig) -> Self {
        Self { messages, index, config }
    }

    /// Returns how many messages were newly embedded. Individual embedding
    /// failures are logged and skipped.
    pub async fn index_recent(&self, user_id: i64, bot_id: i64) -> Result<usize, CoreError> {
        let since = Utc::now() - Duration::days(self.config.recall_window_days);
        let recent = self
            .messages
            .user_messages_elsewhere(user_id, bot_id, since, self.config.recall_history_cap as i64)
            .await
            .map_err(CoreError::persistence)?;
        if recent.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = recent.iter().map(|m| m.source_id()).collect();
        let indexed = self.index.indexed(&ids).await?;

        let mut added = 0;
        for message in recent.iter().filter(|m| !indexed.contains(&m.source_id())) {
            if message.content.trim().is_empty() {
                continue;
            }
            match self
                .index
                .insert_text(message.source_id(), &message.content, message_metadata(message))
                .await
            {
                Ok(_) => added += 1,
                Err(e) => warn!("Could not embed message {}: {}", message.id, e),
            }
        }

        debug!(
            "Recall indexing for user {}: {} recent, {} newly embedded",
            user_id,
            recent.len(),
            added
        );
        Ok(added)
    }
}
