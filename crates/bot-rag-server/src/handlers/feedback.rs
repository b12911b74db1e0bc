use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::database::{BotMetrics, FeedbackHistoryItem, FeedbackPatch, FeedbackRecord, NewFeedback};
use crate::models::chat::Pagination;
use crate::services::FeedbackRecorder;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct FeedbackHistoryResponse {
    pub items: Vec<FeedbackHistoryItem>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn submit_feedback(
    State(feedback): State<Arc<FeedbackRecorder>>,
    Json(request): Json<NewFeedback>,
) -> Result<(StatusCode, Json<FeedbackRecord>), ApiError> {
    let record = feedback.record(request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn update_feedback(
    State(feedback): State<Arc<FeedbackRecorder>>,
    Path(feedback_id): Path<Uuid>,
    Json(patch): Json<FeedbackPatch>,
) -> Result<Json<FeedbackRecord>, ApiError> {
    let record = feedback.update(feedback_id, patch).await?;
    Ok(Json(record))
}

pub async fn bot_metrics(
    State(feedback): State<Arc<FeedbackRecorder>>,
    Path(bot_id): Path<i64>,
) -> Result<Json<BotMetrics>, ApiError> {
    Ok(Json(feedback.bot_metrics(bot_id).await?))
}

pub async fn feedback_history(
    State(feedback): State<Arc<FeedbackRecorder>>,
    Path(bot_id): Path<i64>,
    Query(page): Query<Pagination>,
) -> Result<Json<FeedbackHistoryResponse>, ApiError> {
    let (limit, offset) = page.clamped();
    let items = feedback.history(bot_id, limit, offset).await?;
    Ok(Json(FeedbackHistoryResponse { items, limit, offset }))
}
