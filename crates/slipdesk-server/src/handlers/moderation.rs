//! Moderator action handlers
//!
//! Every action accepts an optional `expected_status`. When it no longer
//! matches the stored status the request fails with 409 so a stale queue
//! view cannot overwrite another moderator's decision.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::{get_moderator_id, json_body, AppError, AppState};
use slipdesk_core::models::{SlipDetail, SlipStatus};
use slipdesk_core::{Corrections, ModeratorAction, REJECTION_REASONS};

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    pub expected_status: Option<SlipStatus>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
    pub expected_status: Option<SlipStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CorrectRequest {
    #[serde(flatten)]
    pub corrections: Corrections,
    pub expected_status: Option<SlipStatus>,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: String,
    pub expected_status: Option<SlipStatus>,
}

fn apply(
    state: &AppState,
    id: i64,
    action: ModeratorAction,
    headers: &HeaderMap,
    expected: Option<SlipStatus>,
) -> Result<Json<SlipDetail>, AppError> {
    let moderator = get_moderator_id(headers);
    let detail = state.pipeline.moderate(id, action, &moderator, expected)?;
    Ok(Json(detail))
}

/// POST /api/slips/:id/approve - Approve a slip as extracted
///
/// The body is optional.
pub async fn approve_slip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<SlipDetail>, AppError> {
    let expected = body.and_then(|Json(b)| b.expected_status);
    apply(&state, id, ModeratorAction::Approve, &headers, expected)
}

/// POST /api/slips/:id/reject - Reject with a canonical or free-text reason
///
/// Blank reasons are refused with 400.
pub async fn reject_slip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Result<Json<RejectRequest>, JsonRejection>,
) -> Result<Json<SlipDetail>, AppError> {
    let body = json_body(body)?;
    let action = ModeratorAction::Reject {
        reason: body.reason,
    };
    apply(&state, id, action, &headers, body.expected_status)
}

/// POST /api/slips/:id/correct - Approve with field and line item corrections
pub async fn correct_slip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Result<Json<CorrectRequest>, JsonRejection>,
) -> Result<Json<SlipDetail>, AppError> {
    let body = json_body(body)?;
    let moderator = get_moderator_id(&headers);
    let detail = state
        .pipeline
        .correct(id, &body.corrections, &moderator, body.expected_status)?;
    Ok(Json(detail))
}

/// POST /api/slips/:id/escalate - Send back to manual review with a note
pub async fn escalate_slip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Result<Json<NoteRequest>, JsonRejection>,
) -> Result<Json<SlipDetail>, AppError> {
    let body = json_body(body)?;
    let action = ModeratorAction::Escalate { note: body.note };
    apply(&state, id, action, &headers, body.expected_status)
}

/// POST /api/slips/:id/notes - Attach a review note without changing status
pub async fn add_note(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Result<Json<NoteRequest>, JsonRejection>,
) -> Result<Json<SlipDetail>, AppError> {
    let body = json_body(body)?;
    let action = ModeratorAction::AddNote { note: body.note };
    apply(&state, id, action, &headers, body.expected_status)
}

/// GET /api/rejection-reasons - Canonical rejection reasons
pub async fn rejection_reasons() -> Json<&'static [&'static str]> {
    Json(REJECTION_REASONS)
}
