//! Moderation queue handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{get_moderator_id, AppError, AppState, SuccessResponse, MAX_PAGE_LIMIT};
use slipdesk_core::models::{ExportedReceipt, RiskLevel, Slip, SlipDetail, SlipFilter, SlipStatus};
use slipdesk_core::{analyze_flags, export_slip as export, FraudAnalysis, ValidationReport};

/// Query parameters for the queue listing
#[derive(Debug, Default, Deserialize)]
pub struct SlipListQuery {
    pub status: Option<String>,
    pub risk_level: Option<String>,
    pub retailer: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub duplicates: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SlipListQuery {
    fn into_filter(self) -> Result<SlipFilter, AppError> {
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<SlipStatus>())
            .transpose()
            .map_err(|e| AppError::bad_request(&e))?;
        let risk_level = self
            .risk_level
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<RiskLevel>())
            .transpose()
            .map_err(|e| AppError::bad_request(&e))?;

        Ok(SlipFilter {
            status,
            risk_level,
            retailer: self.retailer,
            from_date: self.from,
            to_date: self.to,
            duplicates_only: self.duplicates,
            limit: self.limit.map(|l| l.clamp(1, MAX_PAGE_LIMIT)),
            offset: self.offset,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SlipListResponse {
    pub slips: Vec<Slip>,
    pub total: i64,
}

/// GET /api/slips - List slips for the moderation queue
pub async fn list_slips(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SlipListQuery>,
) -> Result<Json<SlipListResponse>, AppError> {
    let filter = params.into_filter()?;
    let db = state.pipeline.db();

    let slips = db.list_slips(&filter)?;
    let total = db.count_slips(&filter)?;

    Ok(Json(SlipListResponse { slips, total }))
}

/// Slip detail with the computed review aids
#[derive(Debug, Serialize)]
pub struct SlipDetailResponse {
    #[serde(flatten)]
    pub detail: SlipDetail,
    pub validation: ValidationReport,
    pub fraud_analysis: FraudAnalysis,
}

fn load_detail(state: &AppState, id: i64) -> Result<SlipDetail, AppError> {
    state
        .pipeline
        .db()
        .get_slip_detail(id)?
        .ok_or_else(|| AppError::not_found("Slip not found"))
}

/// GET /api/slips/:id - Slip with items, payments, validation and fraud analysis
pub async fn get_slip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<SlipDetailResponse>, AppError> {
    let detail = load_detail(&state, id)?;
    let validation = state
        .pipeline
        .validation_for(&detail.slip, Utc::now().date_naive());
    let fraud_analysis = analyze_flags(
        detail.slip.fraud_risk_score,
        &detail.slip.fraud_flags,
        &state.pipeline.config().risk_bands,
    );

    Ok(Json(SlipDetailResponse {
        detail,
        validation,
        fraud_analysis,
    }))
}

/// GET /api/slips/:id/export - Slip in the external receipt contract
pub async fn export_slip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ExportedReceipt>, AppError> {
    let detail = load_detail(&state, id)?;
    Ok(Json(export(&detail)))
}

/// DELETE /api/slips/:id - Remove a slip and everything it owns
pub async fn delete_slip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let moderator = get_moderator_id(&headers);

    if !state.pipeline.db().delete_slip(id)? {
        return Err(AppError::not_found("Slip not found"));
    }
    info!(slip_id = id, moderator = %moderator, "Slip deleted by moderator");

    Ok(Json(SuccessResponse { success: true }))
}
