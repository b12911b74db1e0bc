use anyhow::Result;
use tracing::debug;

use super::DbPool;

const SCHEMA: &[(&str, &str)] = &[
    (
        "bot_embeddings",
        r#"CREATE TABLE IF NOT EXISTS bot_embeddings (
            source_id TEXT PRIMARY KEY,
            seq BIGSERIAL NOT NULL,
            content TEXT NOT NULL,
            embedding REAL[] NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )"#,
    ),
    (
        "idx_bot_embeddings_metadata",
        "CREATE INDEX IF NOT EXISTS idx_bot_embeddings_metadata ON bot_embeddings USING gin(metadata jsonb_path_ops)",
    ),
    (
        "bot_knowledge",
        r#"CREATE TABLE IF NOT EXISTS bot_knowledge (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            bot_id BIGINT NOT NULL,
            content TEXT NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )"#,
    ),
    (
        "idx_bot_knowledge_bot",
        "CREATE INDEX IF NOT EXISTS idx_bot_knowledge_bot ON bot_knowledge(bot_id, created_at DESC)",
    ),
    (
        "bot_conversations",
        r#"CREATE TABLE IF NOT EXISTS bot_conversations (
            id UUID PRIMARY KEY,
            bot_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            state JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            last_interaction_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )"#,
    ),
    (
        "idx_bot_conversations_latest",
        "CREATE INDEX IF NOT EXISTS idx_bot_conversations_latest ON bot_conversations(bot_id, user_id, last_interaction_at DESC)",
    ),
    (
        "chat_messages",
        r#"CREATE TABLE IF NOT EXISTS chat_messages (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            sender_id BIGINT NOT NULL,
            sender_is_bot BOOLEAN NOT NULL DEFAULT false,
            destination_type TEXT NOT NULL,
            destination_id BIGINT NOT NULL,
            content TEXT NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )"#,
    ),
    (
        "idx_chat_messages_sender",
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_sender ON chat_messages(sender_id, sender_is_bot, created_at DESC)",
    ),
    (
        "idx_chat_messages_destination",
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_destination ON chat_messages(destination_type, destination_id, created_at DESC)",
    ),
    (
        "bot_feedback",
        r#"CREATE TABLE IF NOT EXISTS bot_feedback (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            bot_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            conversation_id UUID NOT NULL,
            message_index INT NOT NULL,
            rating SMALLINT CHECK (rating BETWEEN 1 AND 5),
            feedback_text TEXT,
            latency_ms BIGINT,
            token_count INT,
            metadata JSONB,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )"#,
    ),
    (
        "idx_bot_feedback_bot",
        "CREATE INDEX IF NOT EXISTS idx_bot_feedback_bot ON bot_feedback(bot_id, created_at DESC)",
    ),
    (
        "bot_metrics",
        r#"CREATE TABLE IF NOT EXISTS bot_metrics (
            bot_id BIGINT PRIMARY KEY,
            feedback_count BIGINT NOT NULL DEFAULT 0,
            rated_count BIGINT NOT NULL DEFAULT 0,
            rating_sum BIGINT NOT NULL DEFAULT 0,
            latency_count BIGINT NOT NULL DEFAULT 0,
            total_latency_ms BIGINT NOT NULL DEFAULT 0,
            total_tokens BIGINT NOT NULL DEFAULT 0,
            last_feedback_at TIMESTAMP WITH TIME ZONE
        )"#,
    ),
    (
        "bot_commands",
        r#"CREATE TABLE IF NOT EXISTS bot_commands (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            bot_id BIGINT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            response_template TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT true,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            CONSTRAINT uq_bot_command_name UNIQUE (bot_id, name)
        )"#,
    ),
    (
        "bot_activity_logs",
        r#"CREATE TABLE IF NOT EXISTS bot_activity_logs (
            id BIGSERIAL PRIMARY KEY,
            conversation_id UUID,
            bot_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            activity_type TEXT NOT NULL,
            activity_status TEXT NOT NULL,
            message_content TEXT,
            response_content TEXT,
            token_count INT,
            processing_time_ms INT,
            llm_call_duration_ms INT,
            retrieval_duration_ms INT,
            error_message TEXT,
            error_type TEXT,
            details JSONB,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )"#,
    ),
];

/// Create every table and index the service needs. Safe to run on each boot.
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    for (name, statement) in SCHEMA {
        debug!("Ensuring {} exists...", name);
        sqlx::query(statement).execute(pool.get_pool()).await?;
    }
    Ok(())
}
