use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::metadata::EmbeddingMetadata;

// ===== LLM WIRE MODELS =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

// ===== REQUEST MODELS =====

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub bot_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    /// Set when the user first opens the bot chat; the bot greets instead of answering.
    #[serde(default)]
    pub is_initializing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: Option<EmbeddingMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeSearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: default_limit(), offset: 0 }
    }
}

impl Pagination {
    /// Clamp to sane bounds before it reaches SQL.
    pub fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, 200), self.offset.max(0))
    }
}

fn default_limit() -> i64 {
    20
}

/// Identifies whose conversation a request targets.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ConversationOwner {
    pub bot_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandToggle {
    pub enabled: bool,
}

// ===== RESPONSE MODELS =====

/// A retrieved knowledge entry returned with an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDocument {
    pub source_id: String,
    pub content: String,
    pub metadata: EmbeddingMetadata,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnAnswer {
    pub answer: String,
    pub sources: Vec<SourceDocument>,
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandReply {
    pub response: String,
    pub success: bool,
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatResponse {
    Answer(TurnAnswer),
    Command(CommandReply),
}
