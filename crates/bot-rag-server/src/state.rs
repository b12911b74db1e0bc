use std::sync::Arc;

use anyhow::Result;
use axum::extract::FromRef;

use crate::config::Settings;
use crate::database::{DbPool, Repository};
use crate::logging::ActivityLogger;
use crate::services::commands::{BuiltinCommands, CommandProvider, CommandRegistry, CustomCommandService, CustomCommands};
use crate::services::conversation::{
    answer_options, condense_options, ConversationOrchestrator, OrchestratorParts, PromptBuilder,
};
use crate::services::{
    ChatService, EmbeddingService, FeedbackRecorder, KnowledgeStore, LlmService, RateLimiterRegistry,
    ReembedJob, VectorIndex,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub settings: Arc<Settings>,
    pub repository: Arc<Repository>,
    pub index: Arc<VectorIndex>,
    pub knowledge: Arc<KnowledgeStore>,
    pub feedback: Arc<FeedbackRecorder>,
    pub registry: Arc<CommandRegistry>,
    pub custom_commands: Arc<CustomCommandService>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub chat_service: Arc<ChatService>,
}

impl AppState {
    pub fn new(settings: Settings, db_pool: DbPool, logger: ActivityLogger) -> Result<Self> {
        let repository = Arc::new(Repository::new(db_pool.clone()));
        let embedding_service = Arc::new(EmbeddingService::new(&settings.embedding)?);
        let llm_service = Arc::new(LlmService::new(settings.llm.clone())?);

        let index = Arc::new(VectorIndex::new(
            repository.clone(),
            embedding_service.clone(),
            settings.embedding.dimension,
        ));
        let knowledge = Arc::new(KnowledgeStore::new(
            repository.clone(),
            index.clone(),
            embedding_service.clone(),
        ));
        let feedback = Arc::new(FeedbackRecorder::new(repository.clone()));
        let limiter = Arc::new(RateLimiterRegistry::new(&settings.rate_limit));

        let registry = Arc::new(CommandRegistry::new(vec![
            Arc::new(BuiltinCommands::new(knowledge.clone())) as Arc<dyn CommandProvider>,
            Arc::new(CustomCommands::new(repository.clone())),
        ]));
        let custom_commands = Arc::new(CustomCommandService::new(repository.clone()));

        let orchestrator = Arc::new(ConversationOrchestrator::new(OrchestratorParts {
            conversations: repository.clone(),
            messages: repository.clone(),
            index: index.clone(),
            knowledge: knowledge.clone(),
            embedder: embedding_service,
            llm: llm_service,
            limiter,
            feedback: feedback.clone(),
            logger,
            prompts: PromptBuilder::new(&settings.prompts),
            retrieval: settings.retrieval.clone(),
            context: settings.context.clone(),
            answer_options: answer_options(&settings.llm),
            condense_options: condense_options(&settings.llm),
        }));
        let chat_service = Arc::new(ChatService::new(orchestrator.clone(), registry.clone()));

        Ok(Self {
            db_pool,
            settings: Arc::new(settings),
            repository,
            index,
            knowledge,
            feedback,
            registry,
            custom_commands,
            orchestrator,
            chat_service,
        })
    }

    pub fn reembed_job(&self) -> ReembedJob {
        ReembedJob::new(
            self.repository.clone(),
            self.index.clone(),
            self.settings.reembed.clone(),
        )
    }
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.db_pool.clone()
    }
}

impl FromRef<AppState> for Arc<ChatService> {
    fn from_ref(state: &AppState) -> Self {
        state.chat_service.clone()
    }
}

impl FromRef<AppState> for Arc<ConversationOrchestrator> {
    fn from_ref(state: &AppState) -> Self {
        state.orchestrator.clone()
    }
}

impl FromRef<AppState> for Arc<KnowledgeStore> {
    fn from_ref(state: &AppState) -> Self {
        state.knowledge.clone()
    }
}

impl FromRef<AppState> for Arc<FeedbackRecorder> {
    fn from_ref(state: &AppState) -> Self {
        state.feedback.clone()
    }
}

impl FromRef<AppState> for Arc<CommandRegistry> {
    fn from_ref(state: &AppState) -> Self {
        state.registry.clone()
    }
}

impl FromRef<AppState> for Arc<CustomCommandService> {
    fn from_ref(state: &AppState) -> Self {
        state.custom_commands.clone()
    }
}
