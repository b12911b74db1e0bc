pub mod models;
pub mod pool;
pub mod repository;
pub mod schema;
pub mod store;

pub use models::*;
pub use pool::DbPool;
pub use repository::Repository;
pub use store::{
    CommandRepository, ConversationStore, EmbeddingStore, FeedbackRepository,
    KnowledgeRepository, MessageLog,
};
