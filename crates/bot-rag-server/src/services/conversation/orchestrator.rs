use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context_manager::{ContextLimits, ContextManager};
use super::history::{merge_history, message_metadata, HistoryEntry, RecallIndexer};
use super::prompt::PromptBuilder;
use crate::config::{ContextConfig, LlmConfig, RetrievalConfig};
use crate::database::{ConversationStore, MessageLog, NewChatMessage, NewFeedback};
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::chat::{ChatMessage, ChatRequest, SourceDocument, TurnAnswer};
use crate::models::conversation::{ConversationContext, MessageRole};
use crate::models::metadata::MetadataFilter;
use crate::services::feedback::FeedbackRecorder;
use crate::services::knowledge_store::KnowledgeStore;
use crate::services::providers::{Completion, EmbeddingProvider, GenerationOptions, LlmProvider};
use crate::services::query_analyzer::QueryAnalyzer;
use crate::services::rate_limiter::RateLimiterRegistry;
use crate::services::vector_index::{SearchHit, VectorIndex};
use crate::utils::error::{CoreError, TurnError};
use crate::utils::token_estimator::{estimate_prompt_tokens, estimate_tokens};

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub bot_id: i64,
    pub user_id: i64,
    pub query: String,
    pub conversation_id: Option<Uuid>,
    /// Opening turn: the bot greets and no user message is stored
    pub is_initializing: bool,
}

impl From<ChatRequest> for TurnRequest {
    fn from(req: ChatRequest) -> Self {
        Self {
            bot_id: req.bot_id,
            user_id: req.user_id,
            query: req.message,
            conversation_id: req.conversation_id,
            is_initializing: req.is_initializing,
        }
    }
}

impl From<SearchHit> for SourceDocument {
    fn from(hit: SearchHit) -> Self {
        Self {
            source_id: hit.source_id,
            content: hit.content,
            metadata: hit.metadata,
            similarity: hit.similarity,
        }
    }
}

pub fn answer_options(config: &LlmConfig) -> GenerationOptions {
    GenerationOptions {
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

pub fn condense_options(config: &LlmConfig) -> GenerationOptions {
    GenerationOptions {
        max_tokens: config.condense_max_tokens,
        temperature: 0.0,
    }
}

/// Everything a turn touches.
pub struct OrchestratorParts {
    pub conversations: Arc<dyn ConversationStore>,
    pub messages: Arc<dyn MessageLog>,
    pub index: Arc<VectorIndex>,
    pub knowledge: Arc<KnowledgeStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub limiter: Arc<RateLimiterRegistry>,
    pub feedback: Arc<FeedbackRecorder>,
    pub logger: ActivityLogger,
    pub prompts: PromptBuilder,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    pub answer_options: GenerationOptions,
    pub condense_options: GenerationOptions,
}

struct TurnTrace {
    started: Instant,
    conversation_id: Option<Uuid>,
    retrieval: Duration,
    llm: Duration,
}

impl TurnTrace {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            conversation_id: None,
            retrieval: Duration::ZERO,
            llm: Duration::ZERO,
        }
    }
}

struct TurnOutcome {
    answer: TurnAnswer,
    token_count: usize,
    rewritten: bool,
}

fn millis(d: Duration) -> i32 {
    d.as_millis().min(i32::MAX as u128) as i32
}

fn error_kind(err: &CoreError) -> &'static str {
    match err {
        CoreError::Validation(_) => "validation",
        CoreError::InvalidRequest(_) => "invalid_request",
        CoreError::Provider(_) => "provider",
        CoreError::RateLimitExceeded { .. } => "rate_limit",
        CoreError::Persistence(_) => "persistence",
        CoreError::NotFound(_) => "not_found",
    }
}

/// Runs one chat turn end to end.
///
/// Order of effects: the rate limiter is charged before anything is
/// written; the user's message is logged next; retrieval and generation
/// follow; the context, the bot reply, the message embedding and the
/// turn's feedback row are written only once an answer exists.
pub struct ConversationOrchestrator {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageLog>,
    index: Arc<VectorIndex>,
    knowledge: Arc<KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    limiter: Arc<RateLimiterRegistry>,
    feedback: Arc<FeedbackRecorder>,
    logger: ActivityLogger,
    prompts: PromptBuilder,
    retrieval: RetrievalConfig,
    limits: ContextLimits,
    answer_options: GenerationOptions,
    condense_options: GenerationOptions,
}

impl ConversationOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        let limits = ContextLimits::new(&parts.context, &parts.retrieval);
        Self {
            conversations: parts.conversations,
            messages: parts.messages,
            index: parts.index,
            knowledge: parts.knowledge,
            embedder: parts.embedder,
            llm: parts.llm,
            limiter: parts.limiter,
            feedback: parts.feedback,
            logger: parts.logger,
            prompts: parts.prompts,
            retrieval: parts.retrieval,
            limits,
            answer_options: parts.answer_options,
            condense_options: parts.condense_options,
        }
    }

    pub fn logger(&self) -> &ActivityLogger {
        &self.logger
    }

    /// The explicit id, or the most recently active conversation of the pair.
    pub async fn resolve_conversation(
        &self,
        bot_id: i64,
        user_id: i64,
        explicit: Option<Uuid>,
    ) -> Result<Option<Uuid>, CoreError> {
        if explicit.is_some() {
            return Ok(explicit);
        }
        self.conversations
            .latest_conversation(bot_id, user_id)
            .await
            .map_err(CoreError::persistence)
    }

    pub fn context_manager(&self, bot_id: i64, user_id: i64, conversation_id: Option<Uuid>) -> ContextManager {
        ContextManager::new(
            self.conversations.clone(),
            self.knowledge.clone(),
            self.limits,
            bot_id,
            user_id,
            conversation_id,
        )
    }

    /// Resolved and initialized context for a bot+user pair.
    pub async fn open_context(
        &self,
        bot_id: i64,
        user_id: i64,
        explicit: Option<Uuid>,
    ) -> Result<ContextManager, CoreError> {
        let conversation_id = self.resolve_conversation(bot_id, user_id, explicit).await?;
        let mut context = self.context_manager(bot_id, user_id, conversation_id);
        context.initialize().await?;
        Ok(context)
    }

    pub async fn conversation_state(
        &self,
        bot_id: i64,
        user_id: i64,
        explicit: Option<Uuid>,
    ) -> Result<(Uuid, ConversationContext), CoreError> {
        let context = self.open_context(bot_id, user_id, explicit).await?;
        let conversation_id = context
            .conversation_id()
            .ok_or_else(|| CoreError::validation("conversation context is not initialized"))?;
        Ok((conversation_id, context.snapshot().cloned().unwrap_or_default()))
    }

    pub async fn clear_conversation(
        &self,
        bot_id: i64,
        user_id: i64,
        explicit: Option<Uuid>,
    ) -> Result<Uuid, CoreError> {
        let mut context = self.open_context(bot_id, user_id, explicit).await?;
        context.clear_context().await?;
        let conversation_id = context
            .conversation_id()
            .ok_or_else(|| CoreError::validation("conversation context is not initialized"))?;

        self.logger.log(
            ActivityLog::builder(bot_id, user_id, ActivityType::ContextCleared)
                .conversation(conversation_id)
                .build(),
        );
        Ok(conversation_id)
    }

    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnAnswer, TurnError> {
        let mut trace = TurnTrace::start();
        info!(
            "Turn for bot {} user {} (initializing: {})",
            request.bot_id, request.user_id, request.is_initializing
        );

        self.logger.log(
            ActivityLog::builder(request.bot_id, request.user_id, ActivityType::TurnReceived)
                .status(ActivityStatus::Info)
                .message(request.query.clone())
                .detail("initializing", request.is_initializing)
                .build(),
        );

        let result = self.run_turn(&request, &mut trace).await;
        self.log_turn(&request, &trace, &result);
        result.map(|outcome| outcome.answer).map_err(TurnError::from)
    }

    async fn run_turn(&self, request: &TurnRequest, trace: &mut TurnTrace) -> Result<TurnOutcome, CoreError> {
        let query = request.query.trim();
        if query.is_empty() && !request.is_initializing {
            return Err(CoreError::invalid_request("message must not be empty"));
        }
        let (bot_id, user_id) = (request.bot_id, request.user_id);

        let mut context = self.open_context(bot_id, user_id, request.conversation_id).await?;
        let conversation_id = context
            .conversation_id()
            .ok_or_else(|| CoreError::validation("conversation context is not initialized"))?;
        trace.conversation_id = Some(conversation_id);

        if request.is_initializing {
            let cost = estimate_tokens(self.prompts.greeting_instruction()) + self.answer_options.max_tokens;
            self.charge(bot_id, cost)?;
            return self.run_greeting(request, context, conversation_id, trace).await;
        }

        // Read-only until the charge goes through; the current message is not logged yet.
        let retrieval_started = Instant::now();
        let dialogue = self
            .messages
            .dialogue(bot_id, user_id, self.retrieval.dialogue_turns as i64)
            .await
            .map_err(CoreError::persistence)?;
        let rewritten = QueryAnalyzer::needs_rewrite(query, !dialogue.is_empty());
        trace.retrieval += retrieval_started.elapsed();

        self.charge(bot_id, self.turn_cost(query, rewritten))?;

        let current = self
            .messages
            .append_message(&NewChatMessage::user_to_bot(user_id, bot_id, query))
            .await
            .map_err(CoreError::persistence)?;

        let retrieval_started = Instant::now();
        RecallIndexer::new(self.messages.as_ref(), &self.index, &self.retrieval)
            .index_recent(user_id, bot_id)
            .await?;

        let query_vector = self.embedder.embed(query).await.map_err(CoreError::provider)?;
        let recall_filter = MetadataFilter::new().is_user_message(true).user_id(user_id);
        let recall = self
            .index
            .search(&query_vector, self.retrieval.recall_top_k, Some(&recall_filter))
            .await?;
        let history = merge_history(&recall, &dialogue);
        trace.retrieval += retrieval_started.elapsed();
        debug!(
            "History for turn: {} recalled, {} dialogue",
            recall.len(),
            dialogue.len()
        );

        let question = if rewritten {
            let question = self.condense(&history, query, trace).await?;
            self.logger.log(
                ActivityLog::builder(bot_id, user_id, ActivityType::QuestionRewritten)
                    .conversation(conversation_id)
                    .status(ActivityStatus::Info)
                    .message(query)
                    .response(question.clone())
                    .build(),
            );
            question
        } else {
            query.to_string()
        };

        let knowledge_started = Instant::now();
        let relevant = context.get_relevant_context(&question).await?;
        trace.retrieval += knowledge_started.elapsed();

        let prompt = self.prompts.answer_messages(&relevant.documents, &history, &question);
        let completion = self.generate(&prompt, self.answer_options, trace).await?;
        let answer = completion.text.trim().to_string();
        if answer.is_empty() {
            return Err(CoreError::provider(anyhow::anyhow!("model returned an empty answer")));
        }

        let document_ids: Vec<String> = relevant.documents.iter().map(|d| d.source_id.clone()).collect();
        context
            .add_user_message_with_documents(
                query,
                Some(json!({ "message_id": current.id })),
                document_ids.clone(),
            )
            .await?;
        context
            .add_message(&answer, MessageRole::Assistant, Some(json!({ "sources": document_ids })))
            .await?;
        let reply = self
            .messages
            .append_message(&NewChatMessage::bot_to_user(bot_id, user_id, answer.as_str()))
            .await
            .map_err(CoreError::persistence)?;
        self.index
            .insert(Some(current.source_id()), query, query_vector, message_metadata(&current))
            .await?;

        let token_count = token_count(&completion, &prompt, &answer);
        self.record_turn(&context, request, reply.id, token_count, rewritten, trace)
            .await?;

        Ok(TurnOutcome {
            answer: TurnAnswer {
                answer,
                sources: relevant.documents.into_iter().map(SourceDocument::from).collect(),
                conversation_id,
            },
            token_count,
            rewritten,
        })
    }

    async fn run_greeting(
        &self,
        request: &TurnRequest,
        mut context: ContextManager,
        conversation_id: Uuid,
        trace: &mut TurnTrace,
    ) -> Result<TurnOutcome, CoreError> {
        let dialogue = self
            .messages
            .dialogue(request.bot_id, request.user_id, self.retrieval.dialogue_turns as i64)
            .await
            .map_err(CoreError::persistence)?;
        let history: Vec<HistoryEntry> = merge_history(&[], &dialogue);

        let prompt = self.prompts.greeting_messages(&history);
        let completion = self.generate(&prompt, self.answer_options, trace).await?;
        let answer = completion.text.trim().to_string();
        if answer.is_empty() {
            return Err(CoreError::provider(anyhow::anyhow!("model returned an empty greeting")));
        }

        context
            .add_message(&answer, MessageRole::Assistant, Some(json!({ "greeting": true })))
            .await?;
        let reply = self
            .messages
            .append_message(&NewChatMessage::bot_to_user(request.bot_id, request.user_id, answer.as_str()))
            .await
            .map_err(CoreError::persistence)?;

        let token_count = token_count(&completion, &prompt, &answer);
        self.record_turn(&context, request, reply.id, token_count, false, trace)
            .await?;

        Ok(TurnOutcome {
            answer: TurnAnswer {
                answer,
                sources: Vec::new(),
                conversation_id,
            },
            token_count,
            rewritten: false,
        })
    }

    /// Token budget a turn may consume: every generative call it will make,
    /// each priced as the question plus that call's completion budget.
    fn turn_cost(&self, query: &str, rewritten: bool) -> usize {
        let question = estimate_tokens(query);
        let mut cost = question + self.answer_options.max_tokens;
        if rewritten {
            cost += question + self.condense_options.max_tokens;
        }
        cost
    }

    /// A cost the bucket could never hold is bad input, not a reason to retry.
    fn charge(&self, bot_id: i64, cost: usize) -> Result<u32, CoreError> {
        let capacity = self.limiter.capacity();
        let requested = u32::try_from(cost).unwrap_or(u32::MAX);
        if requested > capacity {
            return Err(CoreError::invalid_request(format!(
                "message too long: needs {} tokens, the bot allows at most {}",
                requested, capacity
            )));
        }
        self.limiter.remove_tokens(bot_id, requested)
    }

    /// Standalone rewrite of a follow-up. An empty rewrite keeps the original.
    async fn condense(&self, history: &[HistoryEntry], query: &str, trace: &mut TurnTrace) -> Result<String, CoreError> {
        let prompt = self.prompts.condense_messages(history, query);
        let completion = self.generate(&prompt, self.condense_options, trace).await?;
        let rewritten = completion.text.trim();
        if rewritten.is_empty() {
            warn!("Empty question rewrite, keeping the original");
            return Ok(query.to_string());
        }
        debug!("Rewrote '{}' as '{}'", query, rewritten);
        Ok(rewritten.to_string())
    }

    async fn generate(
        &self,
        prompt: &[ChatMessage],
        options: GenerationOptions,
        trace: &mut TurnTrace,
    ) -> Result<Completion, CoreError> {
        let started = Instant::now();
        let result = self.llm.generate(prompt, options).await;
        trace.llm += started.elapsed();
        result.map_err(CoreError::provider)
    }

    async fn record_turn(
        &self,
        context: &ContextManager,
        request: &TurnRequest,
        reply_id: Uuid,
        token_count: usize,
        rewritten: bool,
        trace: &TurnTrace,
    ) -> Result<(), CoreError> {
        let conversation_id = context
            .conversation_id()
            .ok_or_else(|| CoreError::validation("conversation context is not initialized"))?;
        // The index drifts once the window slides; `message_id` keeps pointing at the reply.
        let message_index = context
            .snapshot()
            .map(|c| c.messages.len().saturating_sub(1))
            .unwrap_or(0);

        self.feedback
            .record(NewFeedback {
                bot_id: request.bot_id,
                user_id: request.user_id,
                conversation_id,
                message_index: i32::try_from(message_index).unwrap_or(i32::MAX),
                rating: None,
                feedback_text: None,
                latency_ms: Some(trace.started.elapsed().as_millis().min(i64::MAX as u128) as i64),
                token_count: Some(i32::try_from(token_count).unwrap_or(i32::MAX)),
                metadata: Some(json!({
                    "kind": if request.is_initializing { "greeting" } else { "turn" },
                    "rewritten": rewritten,
                    "message_id": reply_id,
                })),
            })
            .await?;
        Ok(())
    }

    fn log_turn(&self, request: &TurnRequest, trace: &TurnTrace, result: &Result<TurnOutcome, CoreError>) {
        let activity = match result {
            Ok(_) => ActivityType::AnswerGenerated,
            Err(CoreError::RateLimitExceeded { .. }) => ActivityType::RateLimited,
            Err(_) => ActivityType::TurnFailed,
        };

        let mut log = ActivityLog::builder(request.bot_id, request.user_id, activity)
            .message(request.query.clone())
            .processing_time(millis(trace.started.elapsed()))
            .retrieval_duration(millis(trace.retrieval))
            .llm_duration(millis(trace.llm));
        if let Some(id) = trace.conversation_id {
            log = log.conversation(id);
        }

        log = match result {
            Ok(outcome) => log
                .response(outcome.answer.answer.clone())
                .token_count(i32::try_from(outcome.token_count).unwrap_or(i32::MAX))
                .detail("rewritten", outcome.rewritten)
                .detail("sources", outcome.answer.sources.len()),
            Err(err @ CoreError::RateLimitExceeded { .. }) => {
                log.status(ActivityStatus::Warning).detail("reason", err.to_string())
            }
            Err(err) => log.error(err.to_string(), error_kind(err)),
        };

        self.logger.log(log.build());
    }
}

fn token_count(completion: &Completion, prompt: &[ChatMessage], answer: &str) -> usize {
    match completion.usage {
        Some(usage) if usage.total_tokens > 0 => usage.total_tokens as usize,
        _ => estimate_prompt_tokens(prompt.iter().map(|m| m.content.as_str())) + estimate_tokens(answer),
    }
}
