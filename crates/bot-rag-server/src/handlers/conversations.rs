use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::models::chat::ConversationOwner;
use crate::models::conversation::ConversationContext;
use crate::services::conversation::ConversationOrchestrator;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation_id: Uuid,
    pub context: ConversationContext,
}

pub async fn get_conversation(
    State(orchestrator): State<Arc<ConversationOrchestrator>>,
    Path(conversation_id): Path<Uuid>,
    Query(owner): Query<ConversationOwner>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let (conversation_id, context) = orchestrator
        .conversation_state(owner.bot_id, owner.user_id, Some(conversation_id))
        .await?;
    Ok(Json(ConversationResponse { conversation_id, context }))
}

pub async fn clear_context(
    State(orchestrator): State<Arc<ConversationOrchestrator>>,
    Path(conversation_id): Path<Uuid>,
    Query(owner): Query<ConversationOwner>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let conversation_id = orchestrator
        .clear_conversation(owner.bot_id, owner.user_id, Some(conversation_id))
        .await?;
    Ok(Json(ConversationResponse {
        conversation_id,
        context: ConversationContext::default(),
    }))
}
