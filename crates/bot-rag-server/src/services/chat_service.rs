use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::info;

use crate::logging::{ActivityLog, ActivityStatus, ActivityType};
use crate::models::chat::{ChatRequest, ChatResponse, CommandReply};
use crate::models::conversation::MessageRole;
use crate::services::commands::{is_command, CommandRegistry};
use crate::services::conversation::{ConversationOrchestrator, TurnRequest};
use crate::utils::error::TurnError;

/// Entry point for chat input: slash commands go to the registry,
/// everything else becomes a retrieval turn.
pub struct ChatService {
    orchestrator: Arc<ConversationOrchestrator>,
    commands: Arc<CommandRegistry>,
}

impl ChatService {
    pub fn new(orchestrator: Arc<ConversationOrchestrator>, commands: Arc<CommandRegistry>) -> Self {
        Self { orchestrator, commands }
    }

    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse, TurnError> {
        if !request.is_initializing && is_command(&request.message) {
            let reply = self.run_command(&request).await?;
            return Ok(ChatResponse::Command(reply));
        }

        let answer = self.orchestrator.process_turn(TurnRequest::from(request)).await?;
        Ok(ChatResponse::Answer(answer))
    }

    /// Commands skip retrieval and the rate limiter. Input and reply are
    /// both kept in the conversation context.
    async fn run_command(&self, request: &ChatRequest) -> Result<CommandReply, TurnError> {
        let started = Instant::now();
        let input = request.message.trim();

        let mut context = self
            .orchestrator
            .open_context(request.bot_id, request.user_id, request.conversation_id)
            .await?;
        let conversation_id = context
            .conversation_id()
            .ok_or(TurnError::ProcessingFailed)?;

        let outcome = self
            .commands
            .interpret(request.bot_id, request.user_id, conversation_id, input)
            .await?
            .ok_or_else(|| TurnError::Invalid("not a command".to_string()))?;

        context.add_message(input, MessageRole::User, None).await?;
        context
            .add_message(
                &outcome.response,
                MessageRole::Assistant,
                Some(json!({ "command": true, "success": outcome.success })),
            )
            .await?;

        info!(
            "Command for bot {} user {} handled (success={})",
            request.bot_id, request.user_id, outcome.success
        );
        let status = if outcome.success {
            ActivityStatus::Success
        } else {
            ActivityStatus::Warning
        };
        self.orchestrator.logger().log(
            ActivityLog::builder(request.bot_id, request.user_id, ActivityType::CommandExecuted)
                .conversation(conversation_id)
                .status(status)
                .message(input)
                .response(outcome.response.clone())
                .processing_time(started.elapsed().as_millis().min(i32::MAX as u128) as i32)
                .build(),
        );

        Ok(CommandReply {
            response: outcome.response,
            success: outcome.success,
            conversation_id,
        })
    }
}
