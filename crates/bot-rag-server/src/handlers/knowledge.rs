use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::database::KnowledgeEntry;
use crate::models::chat::{KnowledgeRequest, KnowledgeSearchRequest, Pagination, SourceDocument};
use crate::services::KnowledgeStore;
use crate::utils::error::ApiError;

const DEFAULT_SEARCH_LIMIT: usize = 5;
const MAX_SEARCH_LIMIT: usize = 50;

#[derive(Debug, Serialize)]
pub struct KnowledgeSearchResponse {
    pub results: Vec<SourceDocument>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct KnowledgeResetResponse {
    pub deleted: u64,
}

pub async fn list_knowledge(
    State(knowledge): State<Arc<KnowledgeStore>>,
    Path(bot_id): Path<i64>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<KnowledgeEntry>>, ApiError> {
    let (limit, offset) = page.clamped();
    Ok(Json(knowledge.list(bot_id, limit, offset).await?))
}

pub async fn add_knowledge(
    State(knowledge): State<Arc<KnowledgeStore>>,
    Path(bot_id): Path<i64>,
    Json(request): Json<KnowledgeRequest>,
) -> Result<(StatusCode, Json<KnowledgeEntry>), ApiError> {
    let mut metadata = request.metadata.unwrap_or_default();
    metadata.source.get_or_insert_with(|| "api".to_string());

    let entry = knowledge.add_entry(bot_id, &request.content, metadata).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn search_knowledge(
    State(knowledge): State<Arc<KnowledgeStore>>,
    Path(bot_id): Path<i64>,
    Json(request): Json<KnowledgeSearchRequest>,
) -> Result<Json<KnowledgeSearchResponse>, ApiError> {
    info!("Knowledge search for bot {}: {}", bot_id, request.query);

    let limit = request.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).min(MAX_SEARCH_LIMIT);
    let results: Vec<SourceDocument> = knowledge
        .search(bot_id, &request.query, limit)
        .await?
        .into_iter()
        .map(SourceDocument::from)
        .collect();

    let total = results.len();
    Ok(Json(KnowledgeSearchResponse { results, total }))
}

pub async fn delete_knowledge_entry(
    State(knowledge): State<Arc<KnowledgeStore>>,
    Path((bot_id, entry_id)): Path<(i64, Uuid)>,
) -> Result<StatusCode, ApiError> {
    if knowledge.delete_entry(bot_id, entry_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("knowledge entry {}", entry_id)))
    }
}

pub async fn reset_knowledge(
    State(knowledge): State<Arc<KnowledgeStore>>,
    Path(bot_id): Path<i64>,
) -> Result<Json<KnowledgeResetResponse>, ApiError> {
    let deleted = knowledge.reset(bot_id).await?;
    Ok(Json(KnowledgeResetResponse { deleted }))
}
