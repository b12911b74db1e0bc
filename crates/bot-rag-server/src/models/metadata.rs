use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a message was sent. Recall results are tagged with it so the
/// prompt can tell the model which conversation a memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    /// Conversation with a bot persona
    Bot,
    /// Direct message between two users
    Direct,
    /// Group channel
    Group,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bot" => Some(Self::Bot),
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// What produced an embedded unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Knowledge,
    ChatMessage,
}

/// Metadata bag stored next to every embedding.
///
/// Call sites read the well-known fields directly; anything else rides
/// along in `extra` and round-trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_type: Option<ContextType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_user_message: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// e.g. `user-command`, `api`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Equality conjunction over metadata fields.
///
/// Serialized as a JSON object and matched by containment, so a record
/// matches when every field present in the filter has the same value in
/// the record's metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataFilter {
    #[serde(flatten)]
    fields: EmbeddingMetadata,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bot_id(mut self, bot_id: i64) -> Self {
        self.fields.bot_id = Some(bot_id);
        self
    }

    pub fn user_id(mut self, user_id: i64) -> Self {
        self.fields.user_id = Some(user_id);
        self
    }

    pub fn context_type(mut self, context_type: ContextType) -> Self {
        self.fields.context_type = Some(context_type);
        self
    }

    pub fn is_user_message(mut self, value: bool) -> Self {
        self.fields.is_user_message = Some(value);
        self
    }

    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.fields.provenance = Some(provenance);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.fields.source = Some(source.into());
        self
    }

    pub fn knowledge_id(mut self, id: impl Into<String>) -> Self {
        self.fields.knowledge_id = Some(id.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.to_json().as_object().map(|o| o.is_empty()).unwrap_or(true)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.fields).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Containment check against a metadata bag.
    pub fn matches(&self, metadata: &EmbeddingMetadata) -> bool {
        let wanted = self.to_json();
        let have = serde_json::to_value(metadata).unwrap_or(Value::Null);
        match (wanted.as_object(), have.as_object()) {
            (Some(wanted), Some(have)) => wanted.iter().all(|(k, v)| have.get(k) == Some(v)),
            (Some(wanted), None) => wanted.is_empty(),
            _ => false,
        }
    }
}
