use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::database::{
    BotMetrics, FeedbackHistoryItem, FeedbackPatch, FeedbackRecord, FeedbackRepository, NewFeedback,
};
use crate::utils::error::CoreError;

fn validate_rating(rating: Option<i16>) -> Result<(), CoreError> {
    match rating {
        Some(r) if !(1..=5).contains(&r) => Err(CoreError::validation(format!(
            "rating must be between 1 and 5, got {}",
            r
        ))),
        _ => Ok(()),
    }
}

fn validate_counters(latency_ms: Option<i64>, token_count: Option<i32>) -> Result<(), CoreError> {
    if latency_ms.is_some_and(|l| l < 0) || token_count.is_some_and(|t| t < 0) {
        return Err(CoreError::validation("latency and token count must not be negative"));
    }
    Ok(())
}

/// Append-only feedback log. Aggregates are kept by the storage layer.
pub struct FeedbackRecorder {
    repo: Arc<dyn FeedbackRepository>,
}

impl FeedbackRecorder {
    pub fn new(repo: Arc<dyn FeedbackRepository>) -> Self {
        Self { repo }
    }

    /// Every call writes a new row, even for an already rated message.
    pub async fn record(&self, feedback: NewFeedback) -> Result<FeedbackRecord, CoreError> {
        validate_rating(feedback.rating)?;
        validate_counters(feedback.latency_ms, feedback.token_count)?;
        if feedback.message_index < 0 {
            return Err(CoreError::validation("message_index must not be negative"));
        }

        let record = self
            .repo
            .insert_feedback(&feedback)
            .await
            .map_err(CoreError::persistence)?;
        info!(
            "Feedback {} recorded for bot {} conversation {}",
            record.id, record.bot_id, record.conversation_id
        );
        Ok(record)
    }

    /// Rewrites only the supplied fields.
    pub async fn update(&self, feedback_id: Uuid, patch: FeedbackPatch) -> Result<FeedbackRecord, CoreError> {
        if patch.is_empty() {
            return Err(CoreError::validation("no fields to update"));
        }
        validate_rating(patch.rating)?;
        validate_counters(patch.latency_ms, patch.token_count)?;

        self.repo
            .update_feedback(feedback_id, &patch)
            .await
            .map_err(CoreError::persistence)?
            .ok_or_else(|| CoreError::NotFound(format!("feedback {}", feedback_id)))
    }

    pub async fn bot_metrics(&self, bot_id: i64) -> Result<BotMetrics, CoreError> {
        self.repo.bot_metrics(bot_id).await.map_err(CoreError::persistence)
    }

    pub async fn history(&self, bot_id: i64, limit: i64, offset: i64) -> Result<Vec<FeedbackHistoryItem>, CoreError> {
        self.repo
            .feedback_history(bot_id, limit, offset)
            .await
            .map_err(CoreError::persistence)
    }
}
