//! Conversation memory and turn orchestration
//!
//! - `ContextManager`: bounded per-conversation state, persisted as one blob
//! - `history`: dialogue + cross-conversation recall
//! - `prompt`: template filling
//! - `ConversationOrchestrator`: one chat turn, end to end

pub mod context_manager;
pub mod history;
pub mod orchestrator;
pub mod prompt;

pub use context_manager::{ContextLimits, ContextManager, RelevantContext};
pub use history::{merge_history, HistoryEntry, RecallIndexer};
pub use orchestrator::{answer_options, condense_options, ConversationOrchestrator, OrchestratorParts, TurnRequest};
pub use prompt::PromptBuilder;
