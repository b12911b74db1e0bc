pub mod chat_service;
pub mod commands;
pub mod conversation;
pub mod embedding_service;
pub mod feedback;
pub mod knowledge_store;
pub mod llm_service;
pub mod providers;
pub mod query_analyzer;
pub mod rate_limiter;
pub mod reembed;
pub mod vector_index;

pub use chat_service::ChatService;
pub use embedding_service::EmbeddingService;
pub use feedback::FeedbackRecorder;
pub use knowledge_store::KnowledgeStore;
pub use llm_service::LlmService;
pub use rate_limiter::RateLimiterRegistry;
pub use reembed::{ReembedJob, ReembedReport};
pub use vector_index::VectorIndex;
