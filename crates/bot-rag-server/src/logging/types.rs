use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Activity type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    TurnReceived,
    CommandExecuted,
    RateLimited,
    QuestionRewritten,
    AnswerGenerated,
    TurnFailed,
    ContextCleared,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnReceived => "turn_received",
            Self::CommandExecuted => "command_executed",
            Self::RateLimited => "rate_limited",
            Self::QuestionRewritten => "question_rewritten",
            Self::AnswerGenerated => "answer_generated",
            Self::TurnFailed => "turn_failed",
            Self::ContextCleared => "context_cleared",
        }
    }
}

/// Activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Warning,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// One row of `bot_activity_logs`.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    pub conversation_id: Option<Uuid>,
    pub bot_id: i64,
    pub user_id: i64,

    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    pub message_content: Option<String>,
    pub response_content: Option<String>,

    // Metrics
    pub token_count: Option<i32>,
    pub processing_time_ms: Option<i32>,
    pub llm_call_duration_ms: Option<i32>,
    pub retrieval_duration_ms: Option<i32>,

    pub error_message: Option<String>,
    pub error_type: Option<String>,

    pub details: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    /// Create builder for fluent API
    pub fn builder(bot_id: i64, user_id: i64, activity_type: ActivityType) -> ActivityLogBuilder {
        ActivityLogBuilder::new(bot_id, user_id, activity_type)
    }
}

/// Builder pattern for ActivityLog
pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(bot_id: i64, user_id: i64, activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                conversation_id: None,
                bot_id,
                user_id,
                activity_type,
                activity_status: ActivityStatus::Success,
                message_content: None,
                response_content: None,
                token_count: None,
                processing_time_ms: None,
                llm_call_duration_ms: None,
                retrieval_duration_ms: None,
                error_message: None,
                error_type: None,
                details: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn conversation(mut self, id: Uuid) -> Self {
        self.log.conversation_id = Some(id);
        self
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn message(mut self, content: impl Into<String>) -> Self {
        self.log.message_content = Some(content.into());
        self
    }

    pub fn response(mut self, content: impl Into<String>) -> Self {
        self.log.response_content = Some(content.into());
        self
    }

    pub fn token_count(mut self, count: i32) -> Self {
        self.log.token_count = Some(count);
        self
    }

    pub fn processing_time(mut self, ms: i32) -> Self {
        self.log.processing_time_ms = Some(ms);
        self
    }

    pub fn llm_duration(mut self, ms: i32) -> Self {
        self.log.llm_call_duration_ms = Some(ms);
        self
    }

    pub fn retrieval_duration(mut self, ms: i32) -> Self {
        self.log.retrieval_duration_ms = Some(ms);
        self
    }

    pub fn error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.error_type = Some(error_type.into());
        self.log.activity_status = ActivityStatus::Error;
        self
    }

    /// Extra key-value data, stored as JSONB
    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.log
            .details
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}
