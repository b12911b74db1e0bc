use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One entry of a conversation's bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Derived per-conversation metadata, rewritten on every mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// Knowledge hits for the latest user turn (replaced, never merged)
    #[serde(default)]
    pub relevant_document_ids: Vec<String>,
    #[serde(default)]
    pub last_topics: Vec<String>,
    /// Most recent command inputs, oldest first
    #[serde(default)]
    pub command_history: Vec<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// The opaque state blob persisted per conversation id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub messages: Vec<ContextMessage>,
    #[serde(default)]
    pub metadata: ContextMetadata,
}

impl ConversationContext {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.metadata.command_history.is_empty()
    }
}
