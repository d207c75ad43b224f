//! Audit trail handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, MAX_PAGE_LIMIT};
use slipdesk_core::models::{ActivityFeedItem, ActivityLogEntry};

/// GET /api/slips/:id/activity - Full history of one slip, oldest first
pub async fn slip_activity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ActivityLogEntry>>, AppError> {
    let db = state.pipeline.db();
    if db.get_slip(id)?.is_none() {
        return Err(AppError::not_found("Slip not found"));
    }
    Ok(Json(db.list_activity(id)?))
}

#[derive(Debug, Deserialize)]
pub struct RecentActivityQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: i64,
}

fn default_recent_limit() -> i64 {
    20
}

/// GET /api/activity - Latest moderation activity across all slips
pub async fn recent_activity(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentActivityQuery>,
) -> Result<Json<Vec<ActivityFeedItem>>, AppError> {
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.pipeline.db().recent_activity(limit)?))
}
