use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub reembed: ReembedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String,
    pub dimension: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_seconds: u64,
}

fn default_embedding_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    pub timeout_seconds: u64,
    /// Completion budget of the answering call; also charged against the rate limiter.
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Budget of the standalone-question rewrite call.
    #[serde(default = "default_condense_max_tokens")]
    pub condense_max_tokens: usize,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_condense_max_tokens() -> usize {
    128
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Direct dialogue turns loaded per request.
    pub dialogue_turns: usize,
    pub recall_window_days: i64,
    pub recall_history_cap: usize,
    pub recall_top_k: usize,
    pub knowledge_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dialogue_turns: 10,
            recall_window_days: 7,
            recall_history_cap: 100,
            recall_top_k: 5,
            knowledge_top_k: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    pub max_context_messages: usize,
    pub command_history_limit: usize,
    pub max_topics: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_messages: 10,
            command_history_limit: 10,
            max_topics: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket size in tokens.
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 40_000,
            refill_per_second: 40_000.0 / 60.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ReembedConfig {
    pub page_size: usize,
    pub delay_ms: u64,
    pub concurrency: usize,
}

impl Default for ReembedConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            delay_ms: 2_000,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
    pub directory: String,
    pub activity_queue_capacity: usize,
    pub activity_batch_size: usize,
    pub activity_workers: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,bot_rag_server=debug".to_string(),
            format: "json".to_string(),
            directory: "logs".to_string(),
            activity_queue_capacity: 10_000,
            activity_batch_size: 100,
            activity_workers: 2,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    /// Placeholders: {{KNOWLEDGE}}, {{HISTORY}}, {{QUESTION}}
    pub answer_template: String,
    /// Placeholders: {{HISTORY}}, {{QUESTION}}
    pub condense_template: String,
    pub greeting_instruction: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            answer_template: r#"You are a helpful bot persona in a group chat platform.
Use the knowledge and the conversation history below to answer the question.
If the knowledge does not cover the question, answer from the conversation or say you do not know.

Knowledge:
{{KNOWLEDGE}}

Conversation history:
{{HISTORY}}

Question: {{QUESTION}}
Answer:"#
                .to_string(),
            condense_template: r#"Given the conversation below and a follow-up question, rewrite the follow-up as a standalone question.
Return only the rewritten question.

Conversation:
{{HISTORY}}

Follow-up question: {{QUESTION}}
Standalone question:"#
                .to_string(),
            greeting_instruction: "Greet the user briefly and explain what you can help with.".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
