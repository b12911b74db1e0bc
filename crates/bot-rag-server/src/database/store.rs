//! Storage seams used by the services.
//!
//! `Repository` implements every trait over Postgres; tests plug in an
//! in-memory store instead.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use super::models::{
    BotMetrics, ChatLogMessage, CustomCommandDefinition, EmbeddingRecord, FeedbackHistoryItem,
    FeedbackPatch, FeedbackRecord, KnowledgeEntry, NewChatMessage, NewCustomCommand, NewFeedback,
    StoredConversation, StoredEmbedding,
};
use crate::models::conversation::ConversationContext;
use crate::models::metadata::{EmbeddingMetadata, MetadataFilter};

#[async_trait::async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Insert-or-skip on `source_id`. Returns `true` when a row was written.
    async fn insert_embedding(&self, record: &EmbeddingRecord) -> Result<bool>;

    /// All rows matching the filter, in insertion order.
    async fn embedding_candidates(&self, filter: Option<&MetadataFilter>) -> Result<Vec<StoredEmbedding>>;

    /// Subset of `source_ids` that already have an embedding.
    async fn indexed_sources(&self, source_ids: &[String]) -> Result<HashSet<String>>;

    async fn delete_embeddings_by_ids(&self, source_ids: &[String]) -> Result<u64>;

    async fn delete_embeddings_by_filter(&self, filter: &MetadataFilter) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn insert_knowledge(
        &self,
        bot_id: i64,
        content: &str,
        metadata: &EmbeddingMetadata,
    ) -> Result<KnowledgeEntry>;

    /// Newest first.
    async fn list_knowledge(&self, bot_id: i64, limit: i64, offset: i64) -> Result<Vec<KnowledgeEntry>>;

    async fn delete_knowledge(&self, bot_id: i64, id: Uuid) -> Result<bool>;

    async fn delete_bot_knowledge(&self, bot_id: i64) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load_conversation(&self, conversation_id: Uuid) -> Result<Option<StoredConversation>>;

    /// Most recently active conversation between a bot and a user.
    async fn latest_conversation(&self, bot_id: i64, user_id: i64) -> Result<Option<Uuid>>;

    /// Replace the whole state blob (creating the row on first use) and
    /// bump `last_interaction_at`.
    async fn save_conversation(
        &self,
        conversation_id: Uuid,
        bot_id: i64,
        user_id: i64,
        state: &ConversationContext,
    ) -> Result<()>;
}

#[async_trait::async_trait]
pub trait MessageLog: Send + Sync {
    async fn append_message(&self, message: &NewChatMessage) -> Result<ChatLogMessage>;

    /// Last `limit` messages exchanged between a bot and a user, oldest first.
    async fn dialogue(
        &self,
        bot_id: i64,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ChatLogMessage>>;

    /// Messages the user sent anywhere except to this bot since `since`,
    /// newest first.
    async fn user_messages_elsewhere(
        &self,
        user_id: i64,
        bot_id: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ChatLogMessage>>;

    /// User-authored messages without an embedding, ordered by
    /// (created_at, id) and strictly after `after`.
    async fn messages_missing_embedding(
        &self,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ChatLogMessage>>;
}

#[async_trait::async_trait]
pub trait FeedbackRepository: Send + Sync {
    async fn insert_feedback(&self, feedback: &NewFeedback) -> Result<FeedbackRecord>;

    async fn update_feedback(&self, id: Uuid, patch: &FeedbackPatch) -> Result<Option<FeedbackRecord>>;

    async fn bot_metrics(&self, bot_id: i64) -> Result<BotMetrics>;

    /// Newest first.
    async fn feedback_history(&self, bot_id: i64, limit: i64, offset: i64) -> Result<Vec<FeedbackHistoryItem>>;
}

#[async_trait::async_trait]
pub trait CommandRepository: Send + Sync {
    /// Every custom command of a bot, disabled ones included, by name.
    async fn custom_commands(&self, bot_id: i64) -> Result<Vec<CustomCommandDefinition>>;

    async fn find_custom_command(&self, bot_id: i64, name: &str) -> Result<Option<CustomCommandDefinition>>;

    async fn upsert_custom_command(&self, command: &NewCustomCommand) -> Result<CustomCommandDefinition>;

    async fn set_custom_command_enabled(&self, bot_id: i64, name: &str, enabled: bool) -> Result<bool>;

    async fn delete_custom_command(&self, bot_id: i64, name: &str) -> Result<bool>;
}
