//! Slip ingestion handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{json_body, AppError, AppState};
use slipdesk_core::models::{ExportedReceipt, SlipStatus};
use slipdesk_core::{
    BulkIngest, BulkOptions, BulkReport, FraudAssessment, IngestOutcome, ValidationReport,
};

/// Request body for a single upload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub image_url: Option<String>,
    pub user_id: Option<String>,
}

/// Success body for a single upload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub success: bool,
    pub receipt_id: i64,
    pub is_duplicate: bool,
    pub duplicate_of: Option<i64>,
    pub status: SlipStatus,
    pub data: ExportedReceipt,
    pub validation: ValidationReport,
    pub fraud: FraudAssessment,
    pub warnings: Vec<String>,
}

impl From<IngestOutcome> for ProcessResponse {
    fn from(outcome: IngestOutcome) -> Self {
        Self {
            success: true,
            receipt_id: outcome.slip_id,
            is_duplicate: outcome.is_duplicate,
            duplicate_of: outcome.duplicate_of,
            status: outcome.status,
            data: outcome.exported,
            validation: outcome.validation,
            fraud: outcome.fraud,
            warnings: outcome.warnings,
        }
    }
}

/// POST /api/process-receipt - OCR, score and store one slip image
pub async fn process_receipt(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ProcessRequest>, JsonRejection>,
) -> Result<Json<ProcessResponse>, AppError> {
    let body = json_body(body)?;
    let image_url = body
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::bad_request("imageUrl is required"))?;

    let outcome = state
        .pipeline
        .process(image_url, body.user_id.as_deref())
        .await?;

    Ok(Json(outcome.into()))
}

/// Request body for a bulk upload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub concurrency: Option<usize>,
    pub user_id: Option<String>,
}

/// POST /api/process-receipts/bulk - Ingest many images with a bounded worker pool
pub async fn process_bulk(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BulkRequest>, JsonRejection>,
) -> Result<Json<BulkReport>, AppError> {
    let body = json_body(body)?;
    let urls: Vec<String> = body
        .image_urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if urls.is_empty() {
        return Err(AppError::bad_request("imageUrls must not be empty"));
    }

    let options = BulkOptions {
        concurrency: body
            .concurrency
            .unwrap_or(state.pipeline.config().bulk.concurrency),
        user_id: body.user_id,
    };
    options.validate()?;

    let bulk = BulkIngest::new(state.pipeline.clone());
    let report = bulk.run(urls, &options).await?;

    info!(
        total = report.total,
        completed = report.completed,
        failed = report.failed,
        "Bulk ingest request finished"
    );

    Ok(Json(report))
}
