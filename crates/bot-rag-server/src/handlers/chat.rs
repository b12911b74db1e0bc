use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::info;

use crate::models::chat::{ChatRequest, ChatResponse};
use crate::services::ChatService;
use crate::utils::error::ApiError;

pub async fn chat_handler(
    State(chat): State<Arc<ChatService>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    info!(
        "Chat request: bot={}, user={}, conversation={:?}",
        request.bot_id, request.user_id, request.conversation_id
    );

    let response = chat.handle(request).await?;
    Ok(Json(response))
}
