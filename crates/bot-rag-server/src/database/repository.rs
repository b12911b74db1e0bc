use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    BotMetrics, ChatLogMessage, CustomCommandDefinition, EmbeddingRecord, FeedbackHistoryItem,
    FeedbackPatch, FeedbackRecord, KnowledgeEntry, NewChatMessage, NewCustomCommand, NewFeedback,
    StoredConversation, StoredEmbedding,
};
use super::store::{
    CommandRepository, ConversationStore, EmbeddingStore, FeedbackRepository,
    KnowledgeRepository, MessageLog,
};
use super::DbPool;
use crate::models::conversation::ConversationContext;
use crate::models::metadata::{ContextType, EmbeddingMetadata, MetadataFilter};

const CHAT_MESSAGE_COLUMNS: &str =
    "id, sender_id, sender_is_bot, destination_type, destination_id, content, created_at";

const FEEDBACK_COLUMNS: &str = "id, bot_id, user_id, conversation_id, message_index, rating, \
     feedback_text, latency_ms, token_count, metadata, created_at, updated_at";

pub struct Repository {
    pub pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Change applied to a bot's aggregate row alongside a feedback write.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct MetricsDelta {
    feedback_count: i64,
    rated_count: i64,
    rating_sum: i64,
    latency_count: i64,
    total_latency_ms: i64,
    total_tokens: i64,
}

impl MetricsDelta {
    fn for_insert(feedback: &NewFeedback) -> Self {
        Self {
            feedback_count: 1,
            rated_count: feedback.rating.is_some() as i64,
            rating_sum: feedback.rating.map(i64::from).unwrap_or(0),
            latency_count: feedback.latency_ms.is_some() as i64,
            total_latency_ms: feedback.latency_ms.unwrap_or(0),
            total_tokens: feedback.token_count.map(i64::from).unwrap_or(0),
        }
    }

    fn between(before: &FeedbackRecord, after: &FeedbackRecord) -> Self {
        let rating = |r: &FeedbackRecord| r.rating.map(i64::from);
        let tokens = |r: &FeedbackRecord| r.token_count.map(i64::from).unwrap_or(0);
        Self {
            feedback_count: 0,
            rated_count: rating(after).is_some() as i64 - rating(before).is_some() as i64,
            rating_sum: rating(after).unwrap_or(0) - rating(before).unwrap_or(0),
            latency_count: after.latency_ms.is_some() as i64 - before.latency_ms.is_some() as i64,
            total_latency_ms: after.latency_ms.unwrap_or(0) - before.latency_ms.unwrap_or(0),
            total_tokens: tokens(after) - tokens(before),
        }
    }

    fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

async fn apply_metrics_delta(
    tx: &mut Transaction<'_, Postgres>,
    bot_id: i64,
    delta: MetricsDelta,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO bot_metrics
               (bot_id, feedback_count, rated_count, rating_sum,
                latency_count, total_latency_ms, total_tokens, last_feedback_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
           ON CONFLICT (bot_id) DO UPDATE SET
               feedback_count = bot_metrics.feedback_count + EXCLUDED.feedback_count,
               rated_count = bot_metrics.rated_count + EXCLUDED.rated_count,
               rating_sum = bot_metrics.rating_sum + EXCLUDED.rating_sum,
               latency_count = bot_metrics.latency_count + EXCLUDED.latency_count,
               total_latency_ms = bot_metrics.total_latency_ms + EXCLUDED.total_latency_ms,
               total_tokens = bot_metrics.total_tokens + EXCLUDED.total_tokens,
               last_feedback_at = NOW()"#,
    )
    .bind(bot_id)
    .bind(delta.feedback_count)
    .bind(delta.rated_count)
    .bind(delta.rating_sum)
    .bind(delta.latency_count)
    .bind(delta.total_latency_ms)
    .bind(delta.total_tokens)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait::async_trait]
impl EmbeddingStore for Repository {
    async fn insert_embedding(&self, record: &EmbeddingRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO bot_embeddings (source_id, content, embedding, metadata)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (source_id) DO NOTHING"#,
        )
        .bind(&record.source_id)
        .bind(&record.content)
        .bind(&record.vector)
        .bind(Json(&record.metadata))
        .execute(self.pool.get_pool())
        .await?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!("Embedding {} already indexed, skipped", record.source_id);
        }
        Ok(inserted)
    }

    async fn embedding_candidates(&self, filter: Option<&MetadataFilter>) -> Result<Vec<StoredEmbedding>> {
        let filter_json = filter
            .map(|f| f.to_json())
            .unwrap_or_else(|| serde_json::json!({}));

        let rows = sqlx::query_as::<_, StoredEmbedding>(
            r#"SELECT source_id, content, embedding, metadata, seq
               FROM bot_embeddings
               WHERE metadata @> $1::jsonb
               ORDER BY seq"#,
        )
        .bind(Json(filter_json))
        .persistent(false)
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!("Loaded {} embedding candidates", rows.len());
        Ok(rows)
    }

    async fn indexed_sources(&self, source_ids: &[String]) -> Result<HashSet<String>> {
        if source_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT source_id FROM bot_embeddings WHERE source_id = ANY($1)",
        )
        .bind(source_ids)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn delete_embeddings_by_ids(&self, source_ids: &[String]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM bot_embeddings WHERE source_id = ANY($1)")
            .bind(source_ids)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_embeddings_by_filter(&self, filter: &MetadataFilter) -> Result<u64> {
        let result = sqlx::query("DELETE FROM bot_embeddings WHERE metadata @> $1::jsonb")
            .bind(Json(filter.to_json()))
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl KnowledgeRepository for Repository {
    async fn insert_knowledge(
        &self,
        bot_id: i64,
        content: &str,
        metadata: &EmbeddingMetadata,
    ) -> Result<KnowledgeEntry> {
        let entry = sqlx::query_as::<_, KnowledgeEntry>(
            r#"INSERT INTO bot_knowledge (bot_id, content, metadata)
               VALUES ($1, $2, $3)
               RETURNING id, bot_id, content, metadata, created_at"#,
        )
        .bind(bot_id)
        .bind(content)
        .bind(Json(metadata))
        .fetch_one(self.pool.get_pool())
        .await?;

        debug!("Stored knowledge {} for bot {}", entry.id, bot_id);
        Ok(entry)
    }

    async fn list_knowledge(&self, bot_id: i64, limit: i64, offset: i64) -> Result<Vec<KnowledgeEntry>> {
        let rows = sqlx::query_as::<_, KnowledgeEntry>(
            r#"SELECT id, bot_id, content, metadata, created_at
               FROM bot_knowledge
               WHERE bot_id = $1
               ORDER BY created_at DESC, id
               LIMIT $2 OFFSET $3"#,
        )
        .bind(bot_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows)
    }

    async fn delete_knowledge(&self, bot_id: i64, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bot_knowledge WHERE bot_id = $1 AND id = $2")
            .bind(bot_id)
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_bot_knowledge(&self, bot_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM bot_knowledge WHERE bot_id = $1")
            .bind(bot_id)
            .execute(self.pool.get_pool())
            .await?;
        debug!("Deleted {} knowledge rows for bot {}", result.rows_affected(), bot_id);
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl ConversationStore for Repository {
    async fn load_conversation(&self, conversation_id: Uuid) -> Result<Option<StoredConversation>> {
        let row = sqlx::query_as::<_, StoredConversation>(
            r#"SELECT id, bot_id, user_id, state, last_interaction_at
               FROM bot_conversations
               WHERE id = $1"#,
        )
        .bind(conversation_id)
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(row)
    }

    async fn latest_conversation(&self, bot_id: i64, user_id: i64) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT id FROM bot_conversations
               WHERE bot_id = $1 AND user_id = $2
               ORDER BY last_interaction_at DESC
               LIMIT 1"#,
        )
        .bind(bot_id)
        .bind(user_id)
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(id)
    }

    async fn save_conversation(
        &self,
        conversation_id: Uuid,
        bot_id: i64,
        user_id: i64,
        state: &ConversationContext,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO bot_conversations (id, bot_id, user_id, state, last_interaction_at)
               VALUES ($1, $2, $3, $4, NOW())
               ON CONFLICT (id) DO UPDATE SET
                   state = EXCLUDED.state,
                   last_interaction_at = NOW()"#,
        )
        .bind(conversation_id)
        .bind(bot_id)
        .bind(user_id)
        .bind(Json(state))
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageLog for Repository {
    async fn append_message(&self, message: &NewChatMessage) -> Result<ChatLogMessage> {
        let query = format!(
            r#"INSERT INTO chat_messages
                   (sender_id, sender_is_bot, destination_type, destination_id, content)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {}"#,
            CHAT_MESSAGE_COLUMNS
        );
        let row = sqlx::query_as::<_, ChatLogMessage>(&query)
            .bind(message.sender_id)
            .bind(message.sender_is_bot)
            .bind(message.destination.as_str())
            .bind(message.destination_id)
            .bind(&message.content)
            .fetch_one(self.pool.get_pool())
            .await?;
        Ok(row)
    }

    async fn dialogue(
        &self,
        bot_id: i64,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ChatLogMessage>> {
        let query = format!(
            r#"SELECT {} FROM chat_messages
               WHERE ((sender_id = $2 AND sender_is_bot = false
                       AND destination_type = $3 AND destination_id = $1)
                  OR (sender_id = $1 AND sender_is_bot = true
                       AND destination_type = $4 AND destination_id = $2))
               ORDER BY created_at DESC, id DESC
               LIMIT $5"#,
            CHAT_MESSAGE_COLUMNS
        );
        let mut rows = sqlx::query_as::<_, ChatLogMessage>(&query)
            .bind(bot_id)
            .bind(user_id)
            .bind(ContextType::Bot.as_str())
            .bind(ContextType::Direct.as_str())
            .bind(limit)
            .fetch_all(self.pool.get_pool())
            .await?;
        rows.reverse();
        Ok(rows)
    }

    async fn user_messages_elsewhere(
        &self,
        user_id: i64,
        bot_id: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ChatLogMessage>> {
        let query = format!(
            r#"SELECT {} FROM chat_messages
               WHERE sender_id = $1 AND sender_is_bot = false
                 AND NOT (destination_type = $3 AND destination_id = $2)
                 AND created_at >= $4
               ORDER BY created_at DESC, id DESC
               LIMIT $5"#,
            CHAT_MESSAGE_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChatLogMessage>(&query)
            .bind(user_id)
            .bind(bot_id)
            .bind(ContextType::Bot.as_str())
            .bind(since)
            .bind(limit)
            .fetch_all(self.pool.get_pool())
            .await?;
        Ok(rows)
    }

    async fn messages_missing_embedding(
        &self,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ChatLogMessage>> {
        let (after_ts, after_id) = match after {
            Some((ts, id)) => (Some(ts), Some(id)),
            None => (None, None),
        };
        let query = format!(
            r#"SELECT {} FROM chat_messages m
               WHERE m.sender_is_bot = false
                 AND NOT EXISTS (
                     SELECT 1 FROM bot_embeddings e
                     WHERE e.source_id = 'message:' || m.id::text
                 )
                 AND ($1::timestamptz IS NULL OR (m.created_at, m.id) > ($1, $2::uuid))
               ORDER BY m.created_at, m.id
               LIMIT $3"#,
            CHAT_MESSAGE_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChatLogMessage>(&query)
            .bind(after_ts)
            .bind(after_id)
            .bind(limit)
            .fetch_all(self.pool.get_pool())
            .await?;
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl FeedbackRepository for Repository {
    async fn insert_feedback(&self, feedback: &NewFeedback) -> Result<FeedbackRecord> {
        let mut transaction = self.pool.get_pool().begin().await?;

        let query = format!(
            r#"INSERT INTO bot_feedback
                   (bot_id, user_id, conversation_id, message_index, rating,
                    feedback_text, latency_ms, token_count, metadata)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING {}"#,
            FEEDBACK_COLUMNS
        );
        let record = sqlx::query_as::<_, FeedbackRecord>(&query)
            .bind(feedback.bot_id)
            .bind(feedback.user_id)
            .bind(feedback.conversation_id)
            .bind(feedback.message_index)
            .bind(feedback.rating)
            .bind(&feedback.feedback_text)
            .bind(feedback.latency_ms)
            .bind(feedback.token_count)
            .bind(feedback.metadata.as_ref().map(Json))
            .fetch_one(&mut *transaction)
            .await?;

        apply_metrics_delta(&mut transaction, feedback.bot_id, MetricsDelta::for_insert(feedback)).await?;
        transaction.commit().await?;

        debug!("Recorded feedback {} for bot {}", record.id, record.bot_id);
        Ok(record)
    }

    async fn update_feedback(&self, id: Uuid, patch: &FeedbackPatch) -> Result<Option<FeedbackRecord>> {
        let mut transaction = self.pool.get_pool().begin().await?;

        let select = format!("SELECT {} FROM bot_feedback WHERE id = $1 FOR UPDATE", FEEDBACK_COLUMNS);
        let Some(before) = sqlx::query_as::<_, FeedbackRecord>(&select)
            .bind(id)
            .fetch_optional(&mut *transaction)
            .await?
        else {
            return Ok(None);
        };

        let update = format!(
            r#"UPDATE bot_feedback SET
                   rating = COALESCE($2, rating),
                   feedback_text = COALESCE($3, feedback_text),
                   latency_ms = COALESCE($4, latency_ms),
                   token_count = COALESCE($5, token_count),
                   metadata = COALESCE($6, metadata),
                   updated_at = NOW()
               WHERE id = $1
               RETURNING {}"#,
            FEEDBACK_COLUMNS
        );
        let after = sqlx::query_as::<_, FeedbackRecord>(&update)
            .bind(id)
            .bind(patch.rating)
            .bind(&patch.feedback_text)
            .bind(patch.latency_ms)
            .bind(patch.token_count)
            .bind(patch.metadata.as_ref().map(Json))
            .fetch_one(&mut *transaction)
            .await?;

        let delta = MetricsDelta::between(&before, &after);
        if !delta.is_zero() {
            apply_metrics_delta(&mut transaction, after.bot_id, delta).await?;
        }
        transaction.commit().await?;

        Ok(Some(after))
    }

    async fn bot_metrics(&self, bot_id: i64) -> Result<BotMetrics> {
        let row = sqlx::query_as::<_, BotMetrics>(
            r#"SELECT bot_id, feedback_count, rated_count, rating_sum,
                      CASE WHEN rated_count > 0
                           THEN rating_sum::float8 / rated_count END AS average_rating,
                      latency_count, total_latency_ms,
                      CASE WHEN latency_count > 0
                           THEN total_latency_ms::float8 / latency_count END AS average_latency_ms,
                      total_tokens, last_feedback_at
               FROM bot_metrics
               WHERE bot_id = $1"#,
        )
        .bind(bot_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row.unwrap_or(BotMetrics {
            bot_id,
            ..Default::default()
        }))
    }

    async fn feedback_history(&self, bot_id: i64, limit: i64, offset: i64) -> Result<Vec<FeedbackHistoryItem>> {
        let rows = sqlx::query_as::<_, FeedbackHistoryItem>(
            r#"SELECT f.id, f.user_id, f.conversation_id, f.message_index, f.rating,
                      f.feedback_text, f.latency_ms, f.token_count, f.created_at,
                      COALESCE(m.content, c.state -> 'messages' -> f.message_index ->> 'content') AS message_preview,
                      c.last_interaction_at AS conversation_last_interaction_at
               FROM bot_feedback f
               LEFT JOIN bot_conversations c ON c.id = f.conversation_id
               LEFT JOIN chat_messages m
                      ON f.metadata ->> 'message_id' ~* '^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$'
                     AND m.id = (f.metadata ->> 'message_id')::uuid
               WHERE f.bot_id = $1
               ORDER BY f.created_at DESC, f.id DESC
               LIMIT $2 OFFSET $3"#,
        )
        .bind(bot_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl CommandRepository for Repository {
    async fn custom_commands(&self, bot_id: i64) -> Result<Vec<CustomCommandDefinition>> {
        let rows = sqlx::query_as::<_, CustomCommandDefinition>(
            r#"SELECT id, bot_id, name, description, response_template, enabled, created_at, updated_at
               FROM bot_commands
               WHERE bot_id = $1
               ORDER BY name"#,
        )
        .bind(bot_id)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows)
    }

    async fn find_custom_command(&self, bot_id: i64, name: &str) -> Result<Option<CustomCommandDefinition>> {
        let row = sqlx::query_as::<_, CustomCommandDefinition>(
            r#"SELECT id, bot_id, name, description, response_template, enabled, created_at, updated_at
               FROM bot_commands
               WHERE bot_id = $1 AND name = $2"#,
        )
        .bind(bot_id)
        .bind(name)
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(row)
    }

    async fn upsert_custom_command(&self, command: &NewCustomCommand) -> Result<CustomCommandDefinition> {
        let row = sqlx::query_as::<_, CustomCommandDefinition>(
            r#"INSERT INTO bot_commands (bot_id, name, description, response_template, enabled)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (bot_id, name) DO UPDATE SET
                   description = EXCLUDED.description,
                   response_template = EXCLUDED.response_template,
                   enabled = EXCLUDED.enabled,
                   updated_at = NOW()
               RETURNING id, bot_id, name, description, response_template, enabled, created_at, updated_at"#,
        )
        .bind(command.bot_id)
        .bind(&command.name)
        .bind(&command.description)
        .bind(&command.response_template)
        .bind(command.enabled)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(row)
    }

    async fn set_custom_command_enabled(&self, bot_id: i64, name: &str, enabled: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE bot_commands SET enabled = $3, updated_at = NOW() WHERE bot_id = $1 AND name = $2",
        )
        .bind(bot_id)
        .bind(name)
        .bind(enabled)
        .execute(self.pool.get_pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_custom_command(&self, bot_id: i64, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bot_commands WHERE bot_id = $1 AND name = $2")
            .bind(bot_id)
            .bind(name)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
