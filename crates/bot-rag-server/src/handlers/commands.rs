use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::database::{CustomCommandDefinition, NewCustomCommand};
use crate::models::chat::CommandToggle;
use crate::services::commands::{CommandInfo, CommandRegistry, CustomCommandService};
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct CommandListResponse {
    /// What `/help` would show
    pub available: Vec<CommandInfo>,
    /// Stored custom commands, disabled ones included
    pub custom: Vec<CustomCommandDefinition>,
}

pub async fn list_commands(
    State(registry): State<Arc<CommandRegistry>>,
    State(commands): State<Arc<CustomCommandService>>,
    Path(bot_id): Path<i64>,
) -> Result<Json<CommandListResponse>, ApiError> {
    let available = registry.list(bot_id).await?;
    let custom = commands.list(bot_id).await?;
    Ok(Json(CommandListResponse { available, custom }))
}

pub async fn save_command(
    State(commands): State<Arc<CustomCommandService>>,
    Path(bot_id): Path<i64>,
    Json(request): Json<NewCustomCommand>,
) -> Result<(StatusCode, Json<CustomCommandDefinition>), ApiError> {
    let saved = commands.save(bot_id, request).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn set_command_enabled(
    State(commands): State<Arc<CustomCommandService>>,
    Path((bot_id, name)): Path<(i64, String)>,
    Json(toggle): Json<CommandToggle>,
) -> Result<StatusCode, ApiError> {
    commands.set_enabled(bot_id, &name, toggle.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_command(
    State(commands): State<Arc<CustomCommandService>>,
    Path((bot_id, name)): Path<(i64, String)>,
) -> Result<StatusCode, ApiError> {
    commands.delete(bot_id, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}
