//! Dashboard handler

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;

use crate::{AppError, AppState};
use slipdesk_core::DashboardStats;

/// GET /api/dashboard - Headline counts, series and recent activity
pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DashboardStats>, AppError> {
    let today = Utc::now().date_naive();
    let stats = state
        .pipeline
        .db()
        .dashboard_stats(today, &state.pipeline.config().cost)?;
    Ok(Json(stats))
}
