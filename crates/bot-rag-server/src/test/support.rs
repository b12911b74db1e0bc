//! In-memory doubles for the storage and model seams.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::types::Json;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::config::{ContextConfig, PromptsConfig, RateLimitConfig, RetrievalConfig};
use crate::database::{
    BotMetrics, ChatLogMessage, CommandRepository, ConversationStore, CustomCommandDefinition,
    EmbeddingRecord, EmbeddingStore, FeedbackHistoryItem, FeedbackPatch, FeedbackRecord,
    FeedbackRepository, KnowledgeEntry, KnowledgeRepository, MessageLog, NewChatMessage,
    NewCustomCommand, NewFeedback, StoredConversation, StoredEmbedding,
};
use crate::logging::ActivityLogger;
use crate::models::chat::ChatMessage;
use crate::models::conversation::ConversationContext;
use crate::models::metadata::{EmbeddingMetadata, MetadataFilter};
use crate::services::commands::{BuiltinCommands, CommandProvider, CommandRegistry, CustomCommands};
use crate::services::conversation::{ConversationOrchestrator, OrchestratorParts, PromptBuilder};
use crate::services::providers::{Completion, EmbeddingProvider, GenerationOptions, LlmProvider};
use crate::services::rate_limiter::{ManualClock, RateLimiterRegistry};
use crate::services::{ChatService, FeedbackRecorder, KnowledgeStore, VectorIndex};

pub const TEST_DIMENSION: usize = 64;

#[derive(Default)]
struct State {
    last_tick: Option<DateTime<Utc>>,
    next_seq: i64,
    embeddings: Vec<StoredEmbedding>,
    knowledge: Vec<KnowledgeEntry>,
    conversations: HashMap<Uuid, StoredConversation>,
    messages: Vec<ChatLogMessage>,
    feedback: Vec<FeedbackRecord>,
    commands: Vec<CustomCommandDefinition>,
}

impl State {
    /// Strictly increasing timestamps so ordering never depends on clock resolution.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_tick {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_tick = Some(next);
        next
    }
}

/// Implements every storage trait over plain vectors.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn embedding_count(&self) -> usize {
        self.state.lock().embeddings.len()
    }

    pub fn knowledge_count(&self, bot_id: i64) -> usize {
        self.state.lock().knowledge.iter().filter(|k| k.bot_id == bot_id).count()
    }

    pub fn conversation(&self, id: Uuid) -> Option<ConversationContext> {
        self.state.lock().conversations.get(&id).map(|c| c.state.0.clone())
    }

    pub fn conversation_count(&self) -> usize {
        self.state.lock().conversations.len()
    }

    pub fn messages(&self) -> Vec<ChatLogMessage> {
        self.state.lock().messages.clone()
    }

    pub fn feedback_rows(&self) -> Vec<FeedbackRecord> {
        self.state.lock().feedback.clone()
    }
}

#[async_trait::async_trait]
impl EmbeddingStore for MemoryStore {
    async fn insert_embedding(&self, record: &EmbeddingRecord) -> Result<bool> {
        let mut state = self.state.lock();
        if state.embeddings.iter().any(|e| e.source_id == record.source_id) {
            return Ok(false);
        }
        state.next_seq += 1;
        let seq = state.next_seq;
        state.embeddings.push(StoredEmbedding {
            source_id: record.source_id.clone(),
            content: record.content.clone(),
            embedding: record.vector.clone(),
            metadata: Json(record.metadata.clone()),
            seq,
        });
        Ok(true)
    }

    async fn embedding_candidates(&self, filter: Option<&MetadataFilter>) -> Result<Vec<StoredEmbedding>> {
        let state = self.state.lock();
        Ok(state
            .embeddings
            .iter()
            .filter(|e| filter.map(|f| f.matches(&e.metadata.0)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn indexed_sources(&self, source_ids: &[String]) -> Result<HashSet<String>> {
        let state = self.state.lock();
        Ok(state
            .embeddings
            .iter()
            .filter(|e| source_ids.contains(&e.source_id))
            .map(|e| e.source_id.clone())
            .collect())
    }

    async fn delete_embeddings_by_ids(&self, source_ids: &[String]) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.embeddings.len();
        state.embeddings.retain(|e| !source_ids.contains(&e.source_id));
        Ok((before - state.embeddings.len()) as u64)
    }

    async fn delete_embeddings_by_filter(&self, filter: &MetadataFilter) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.embeddings.len();
        state.embeddings.retain(|e| !filter.matches(&e.metadata.0));
        Ok((before - state.embeddings.len()) as u64)
    }
}

#[async_trait::async_trait]
impl KnowledgeRepository for MemoryStore {
    async fn insert_knowledge(
        &self,
        bot_id: i64,
        content: &str,
        metadata: &EmbeddingMetadata,
    ) -> Result<KnowledgeEntry> {
        let mut state = self.state.lock();
        let entry = KnowledgeEntry {
            id: Uuid::new_v4(),
            bot_id,
            content: content.to_string(),
            metadata: Json(metadata.clone()),
            created_at: state.tick(),
        };
        state.knowledge.push(entry.clone());
        Ok(entry)
    }

    async fn list_knowledge(&self, bot_id: i64, limit: i64, offset: i64) -> Result<Vec<KnowledgeEntry>> {
        let state = self.state.lock();
        Ok(state
            .knowledge
            .iter()
            .rev()
            .filter(|k| k.bot_id == bot_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn delete_knowledge(&self, bot_id: i64, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock();
        let before = state.knowledge.len();
        state.knowledge.retain(|k| !(k.bot_id == bot_id && k.id == id));
        Ok(state.knowledge.len() < before)
    }

    async fn delete_bot_knowledge(&self, bot_id: i64) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.knowledge.len();
        state.knowledge.retain(|k| k.bot_id != bot_id);
        Ok((before - state.knowledge.len()) as u64)
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryStore {
    async fn load_conversation(&self, conversation_id: Uuid) -> Result<Option<StoredConversation>> {
        Ok(self.state.lock().conversations.get(&conversation_id).cloned())
    }

    async fn latest_conversation(&self, bot_id: i64, user_id: i64) -> Result<Option<Uuid>> {
        let state = self.state.lock();
        Ok(state
            .conversations
            .values()
            .filter(|c| c.bot_id == bot_id && c.user_id == user_id)
            .max_by_key(|c| c.last_interaction_at)
            .map(|c| c.id))
    }

    async fn save_conversation(
        &self,
        conversation_id: Uuid,
        bot_id: i64,
        user_id: i64,
        context: &ConversationContext,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let now = state.tick();
        state.conversations.insert(
            conversation_id,
            StoredConversation {
                id: conversation_id,
                bot_id,
                user_id,
                state: Json(context.clone()),
                last_interaction_at: now,
            },
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageLog for MemoryStore {
    async fn append_message(&self, message: &NewChatMessage) -> Result<ChatLogMessage> {
        let mut state = self.state.lock();
        let row = ChatLogMessage {
            id: Uuid::new_v4(),
            sender_id: message.sender_id,
            sender_is_bot: message.sender_is_bot,
            destination_type: message.destination.as_str().to_string(),
            destination_id: message.destination_id,
            content: message.content.clone(),
            created_at: state.tick(),
        };
        state.messages.push(row.clone());
        Ok(row)
    }

    async fn dialogue(
        &self,
        bot_id: i64,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ChatLogMessage>> {
        let state = self.state.lock();
        let mut rows: Vec<ChatLogMessage> = state
            .messages
            .iter()
            .rev()
            .filter(|m| {
                (!m.sender_is_bot
                    && m.sender_id == user_id
                    && m.destination_type == "bot"
                    && m.destination_id == bot_id)
                    || (m.sender_is_bot
                        && m.sender_id == bot_id
                        && m.destination_type == "direct"
                        && m.destination_id == user_id)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
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
        let state = self.state.lock();
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| !m.sender_is_bot && m.sender_id == user_id && m.created_at >= since)
            .filter(|m| !(m.destination_type == "bot" && m.destination_id == bot_id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn messages_missing_embedding(
        &self,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ChatLogMessage>> {
        let state = self.state.lock();
        let indexed: HashSet<&str> = state.embeddings.iter().map(|e| e.source_id.as_str()).collect();
        let mut rows: Vec<ChatLogMessage> = state
            .messages
            .iter()
            .filter(|m| !m.sender_is_bot && !indexed.contains(m.source_id().as_str()))
            .filter(|m| after.map(|cursor| (m.created_at, m.id) > cursor).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.created_at, m.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl FeedbackRepository for MemoryStore {
    async fn insert_feedback(&self, feedback: &NewFeedback) -> Result<FeedbackRecord> {
        let mut state = self.state.lock();
        let now = state.tick();
        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            bot_id: feedback.bot_id,
            user_id: feedback.user_id,
            conversation_id: feedback.conversation_id,
            message_index: feedback.message_index,
            rating: feedback.rating,
            feedback_text: feedback.feedback_text.clone(),
            latency_ms: feedback.latency_ms,
            token_count: feedback.token_count,
            metadata: feedback.metadata.clone().map(Json),
            created_at: now,
            updated_at: now,
        };
        state.feedback.push(record.clone());
        Ok(record)
    }

    async fn update_feedback(&self, id: Uuid, patch: &FeedbackPatch) -> Result<Option<FeedbackRecord>> {
        let mut state = self.state.lock();
        let now = state.tick();
        let Some(record) = state.feedback.iter_mut().find(|f| f.id == id) else {
            return Ok(None);
        };
        if patch.rating.is_some() {
            record.rating = patch.rating;
        }
        if patch.feedback_text.is_some() {
            record.feedback_text = patch.feedback_text.clone();
        }
        if patch.latency_ms.is_some() {
            record.latency_ms = patch.latency_ms;
        }
        if patch.token_count.is_some() {
            record.token_count = patch.token_count;
        }
        if let Some(metadata) = &patch.metadata {
            record.metadata = Some(Json(metadata.clone()));
        }
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    async fn bot_metrics(&self, bot_id: i64) -> Result<BotMetrics> {
        let state = self.state.lock();
        let rows: Vec<&FeedbackRecord> = state.feedback.iter().filter(|f| f.bot_id == bot_id).collect();

        let ratings: Vec<i64> = rows.iter().filter_map(|f| f.rating.map(i64::from)).collect();
        let latencies: Vec<i64> = rows.iter().filter_map(|f| f.latency_ms).collect();
        let rating_sum: i64 = ratings.iter().sum();
        let total_latency_ms: i64 = latencies.iter().sum();

        Ok(BotMetrics {
            bot_id,
            feedback_count: rows.len() as i64,
            rated_count: ratings.len() as i64,
            rating_sum,
            average_rating: (!ratings.is_empty()).then(|| rating_sum as f64 / ratings.len() as f64),
            latency_count: latencies.len() as i64,
            total_latency_ms,
            average_latency_ms: (!latencies.is_empty())
                .then(|| total_latency_ms as f64 / latencies.len() as f64),
            total_tokens: rows.iter().filter_map(|f| f.token_count.map(i64::from)).sum(),
            last_feedback_at: rows.iter().map(|f| f.created_at).max(),
        })
    }

    async fn feedback_history(&self, bot_id: i64, limit: i64, offset: i64) -> Result<Vec<FeedbackHistoryItem>> {
        let state = self.state.lock();
        let mut rows: Vec<&FeedbackRecord> = state.feedback.iter().filter(|f| f.bot_id == bot_id).collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|f| {
                let conversation = state.conversations.get(&f.conversation_id);
                let referenced = f
                    .metadata
                    .as_ref()
                    .and_then(|m| m.0.get("message_id"))
                    .and_then(|id| id.as_str())
                    .and_then(|id| Uuid::parse_str(id).ok())
                    .and_then(|id| state.messages.iter().find(|m| m.id == id))
                    .map(|m| m.content.clone());
                let message_preview = referenced.or_else(|| {
                    conversation.and_then(|c| {
                        usize::try_from(f.message_index)
                            .ok()
                            .and_then(|i| c.state.0.messages.get(i))
                            .map(|m| m.content.clone())
                    })
                });
                FeedbackHistoryItem {
                    id: f.id,
                    user_id: f.user_id,
                    conversation_id: f.conversation_id,
                    message_index: f.message_index,
                    rating: f.rating,
                    feedback_text: f.feedback_text.clone(),
                    latency_ms: f.latency_ms,
                    token_count: f.token_count,
                    created_at: f.created_at,
                    message_preview,
                    conversation_last_interaction_at: conversation.map(|c| c.last_interaction_at),
                }
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl CommandRepository for MemoryStore {
    async fn custom_commands(&self, bot_id: i64) -> Result<Vec<CustomCommandDefinition>> {
        let state = self.state.lock();
        let mut commands: Vec<_> = state.commands.iter().filter(|c| c.bot_id == bot_id).cloned().collect();
        commands.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(commands)
    }

    async fn find_custom_command(&self, bot_id: i64, name: &str) -> Result<Option<CustomCommandDefinition>> {
        let state = self.state.lock();
        Ok(state
            .commands
            .iter()
            .find(|c| c.bot_id == bot_id && c.name == name)
            .cloned())
    }

    async fn upsert_custom_command(&self, command: &NewCustomCommand) -> Result<CustomCommandDefinition> {
        let mut state = self.state.lock();
        let now = state.tick();
        if let Some(existing) = state
            .commands
            .iter_mut()
            .find(|c| c.bot_id == command.bot_id && c.name == command.name)
        {
            existing.description = command.description.clone();
            existing.response_template = command.response_template.clone();
            existing.enabled = command.enabled;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let definition = CustomCommandDefinition {
            id: Uuid::new_v4(),
            bot_id: command.bot_id,
            name: command.name.clone(),
            description: command.description.clone(),
            response_template: command.response_template.clone(),
            enabled: command.enabled,
            created_at: now,
            updated_at: now,
        };
        state.commands.push(definition.clone());
        Ok(definition)
    }

    async fn set_custom_command_enabled(&self, bot_id: i64, name: &str, enabled: bool) -> Result<bool> {
        let mut state = self.state.lock();
        let now = state.tick();
        match state.commands.iter_mut().find(|c| c.bot_id == bot_id && c.name == name) {
            Some(command) => {
                command.enabled = enabled;
                command.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_custom_command(&self, bot_id: i64, name: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let before = state.commands.len();
        state.commands.retain(|c| !(c.bot_id == bot_id && c.name == name));
        Ok(state.commands.len() < before)
    }
}

/// Deterministic bag-of-words embedder: texts sharing words point the same way.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, word: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.dimension as u64) as usize
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.unicode_words() {
            vector[self.bucket(&word.to_lowercase())] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }
}

/// LLM double that replays queued replies and records every prompt.
/// With nothing queued it answers "Scripted reply".
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<(Vec<ChatMessage>, GenerationOptions)>>,
}

impl ScriptedLlm {
    pub fn reply(&self, text: impl Into<String>) {
        self.replies.lock().push_back(Ok(text.into()));
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.replies.lock().push_back(Err(message.into()));
    }

    pub fn calls(&self) -> Vec<(Vec<ChatMessage>, GenerationOptions)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, messages: &[ChatMessage], options: GenerationOptions) -> Result<Completion> {
        self.calls.lock().push((messages.to_vec(), options));
        match self.replies.lock().pop_front() {
            Some(Ok(text)) => Ok(Completion::new(text)),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(Completion::new("Scripted reply")),
        }
    }
}

pub struct KnowledgeFixture {
    pub store: Arc<MemoryStore>,
    pub embedder: Arc<HashEmbedder>,
    pub index: Arc<VectorIndex>,
    pub knowledge: Arc<KnowledgeStore>,
}

pub fn knowledge_fixture() -> KnowledgeFixture {
    let store = Arc::new(MemoryStore::default());
    let embedder = Arc::new(HashEmbedder::new(TEST_DIMENSION));
    let index = Arc::new(VectorIndex::new(store.clone(), embedder.clone(), TEST_DIMENSION));
    let knowledge = Arc::new(KnowledgeStore::new(store.clone(), index.clone(), embedder.clone()));
    KnowledgeFixture {
        store,
        embedder,
        index,
        knowledge,
    }
}

/// A fully wired chat pipeline over the in-memory doubles.
pub struct TurnFixture {
    pub store: Arc<MemoryStore>,
    pub llm: Arc<ScriptedLlm>,
    pub clock: Arc<ManualClock>,
    pub limiter: Arc<RateLimiterRegistry>,
    pub index: Arc<VectorIndex>,
    pub knowledge: Arc<KnowledgeStore>,
    pub feedback: Arc<FeedbackRecorder>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub chat: ChatService,
}

pub const TEST_MAX_TOKENS: usize = 256;
pub const TEST_CONDENSE_TOKENS: usize = 64;

pub fn turn_fixture(context: ContextConfig, rate_limit: RateLimitConfig) -> TurnFixture {
    let KnowledgeFixture {
        store,
        embedder,
        index,
        knowledge,
    } = knowledge_fixture();
    let llm = Arc::new(ScriptedLlm::default());
    let clock = Arc::new(ManualClock::default());
    let limiter = Arc::new(RateLimiterRegistry::with_clock(&rate_limit, clock.clone()));
    let feedback = Arc::new(FeedbackRecorder::new(store.clone()));

    let orchestrator = Arc::new(ConversationOrchestrator::new(OrchestratorParts {
        conversations: store.clone(),
        messages: store.clone(),
        index: index.clone(),
        knowledge: knowledge.clone(),
        embedder,
        llm: llm.clone(),
        limiter: limiter.clone(),
        feedback: feedback.clone(),
        logger: ActivityLogger::disabled(),
        prompts: PromptBuilder::new(&PromptsConfig::default()),
        retrieval: RetrievalConfig::default(),
        context,
        answer_options: GenerationOptions {
            max_tokens: TEST_MAX_TOKENS,
            temperature: 0.7,
        },
        condense_options: GenerationOptions {
            max_tokens: TEST_CONDENSE_TOKENS,
            temperature: 0.0,
        },
    }));

    let commands = Arc::new(CommandRegistry::new(vec![
        Arc::new(BuiltinCommands::new(knowledge.clone())) as Arc<dyn CommandProvider>,
        Arc::new(CustomCommands::new(store.clone())),
    ]));
    let chat = ChatService::new(orchestrator.clone(), commands);

    TurnFixture {
        store,
        llm,
        clock,
        limiter,
        index,
        knowledge,
        feedback,
        orchestrator,
        chat,
    }
}
