use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::conversation::ConversationContext;
use crate::models::metadata::{ContextType, EmbeddingMetadata};

// ============ EMBEDDINGS ============

/// A validated unit ready to be written to the index.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub source_id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: EmbeddingMetadata,
}

/// An embedding row as read back for scoring.
#[derive(Debug, Clone, FromRow)]
pub struct StoredEmbedding {
    pub source_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Json<EmbeddingMetadata>,
    /// Insertion order, used as the similarity tie-breaker
    pub seq: i64,
}

// ============ KNOWLEDGE ============

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct KnowledgeEntry {
    pub id: Uuid,
    pub bot_id: i64,
    pub content: String,
    pub metadata: Json<EmbeddingMetadata>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn source_id(&self) -> String {
        knowledge_source_id(self.id)
    }
}

pub fn knowledge_source_id(id: Uuid) -> String {
    format!("knowledge:{}", id)
}

// ============ CHAT LOG ============

/// A message from the platform's chat log.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatLogMessage {
    pub id: Uuid,
    pub sender_id: i64,
    pub sender_is_bot: bool,
    /// `bot`, `direct` or `group`
    pub destination_type: String,
    pub destination_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatLogMessage {
    pub fn context_type(&self) -> ContextType {
        ContextType::parse(&self.destination_type).unwrap_or(ContextType::Direct)
    }

    pub fn source_id(&self) -> String {
        message_source_id(self.id)
    }
}

pub fn message_source_id(id: Uuid) -> String {
    format!("message:{}", id)
}

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub sender_id: i64,
    pub sender_is_bot: bool,
    pub destination: ContextType,
    pub destination_id: i64,
    pub content: String,
}

impl NewChatMessage {
    pub fn user_to_bot(user_id: i64, bot_id: i64, content: impl Into<String>) -> Self {
        Self {
            sender_id: user_id,
            sender_is_bot: false,
            destination: ContextType::Bot,
            destination_id: bot_id,
            content: content.into(),
        }
    }

    /// Bot replies are addressed to the user as a direct message.
    pub fn bot_to_user(bot_id: i64, user_id: i64, content: impl Into<String>) -> Self {
        Self {
            sender_id: bot_id,
            sender_is_bot: true,
            destination: ContextType::Direct,
            destination_id: user_id,
            content: content.into(),
        }
    }
}

// ============ CONVERSATIONS ============

#[derive(Debug, Clone, FromRow)]
pub struct StoredConversation {
    pub id: Uuid,
    pub bot_id: i64,
    pub user_id: i64,
    pub state: Json<ConversationContext>,
    pub last_interaction_at: DateTime<Utc>,
}

// ============ FEEDBACK ============

#[derive(Debug, Clone, Deserialize)]
pub struct NewFeedback {
    pub bot_id: i64,
    pub user_id: i64,
    pub conversation_id: Uuid,
    pub message_index: i32,
    #[serde(default)]
    pub rating: Option<i16>,
    #[serde(default)]
    pub feedback_text: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<i64>,
    #[serde(default)]
    pub token_count: Option<i32>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub bot_id: i64,
    pub user_id: i64,
    pub conversation_id: Uuid,
    pub message_index: i32,
    pub rating: Option<i16>,
    pub feedback_text: Option<String>,
    pub latency_ms: Option<i64>,
    pub token_count: Option<i32>,
    pub metadata: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; only `Some` fields are written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackPatch {
    #[serde(default)]
    pub rating: Option<i16>,
    #[serde(default)]
    pub feedback_text: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<i64>,
    #[serde(default)]
    pub token_count: Option<i32>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl FeedbackPatch {
    pub fn is_empty(&self) -> bool {
        self.rating.is_none()
            && self.feedback_text.is_none()
            && self.latency_ms.is_none()
            && self.token_count.is_none()
            && self.metadata.is_none()
    }
}

/// Per-bot aggregate kept current by the repository on every feedback write.
#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct BotMetrics {
    pub bot_id: i64,
    pub feedback_count: i64,
    pub rated_count: i64,
    pub rating_sum: i64,
    pub average_rating: Option<f64>,
    pub latency_count: i64,
    pub total_latency_ms: i64,
    pub average_latency_ms: Option<f64>,
    pub total_tokens: i64,
    pub last_feedback_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FeedbackHistoryItem {
    pub id: Uuid,
    pub user_id: i64,
    pub conversation_id: Uuid,
    pub message_index: i32,
    pub rating: Option<i16>,
    pub feedback_text: Option<String>,
    pub latency_ms: Option<i64>,
    pub token_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    /// Content of the rated message, when it is still inside the context window
    pub message_preview: Option<String>,
    pub conversation_last_interaction_at: Option<DateTime<Utc>>,
}

// ============ COMMANDS ============

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CustomCommandDefinition {
    pub id: Uuid,
    pub bot_id: i64,
    pub name: String,
    pub description: String,
    pub response_template: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCustomCommand {
    #[serde(default)]
    pub bot_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub response_template: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
