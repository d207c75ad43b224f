//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use slipdesk_core::db::Database;
use slipdesk_core::models::{ActivityAction, SlipStatus};
use slipdesk_core::test_utils::sample_new_slip;
use slipdesk_core::{OcrClient, PipelineConfig, RetryPolicy};
use tower::ServiceExt;

fn test_pipeline() -> Pipeline {
    let config = PipelineConfig {
        retry: RetryPolicy::none(),
        ..Default::default()
    };
    Pipeline::new(Database::in_memory().unwrap(), OcrClient::mock(), config)
}

fn open_config() -> ServerConfig {
    ServerConfig {
        require_auth: false,
        allowed_origins: vec![],
        ..Default::default()
    }
}

fn setup_test_app() -> (Router, Pipeline) {
    let pipeline = test_pipeline();
    (create_router(pipeline.clone(), open_config()), pipeline)
}

/// Insert a slip waiting in manual review
fn seed_slip(pipeline: &Pipeline, retailer: &str) -> i64 {
    pipeline
        .db()
        .insert_slip(&sample_new_slip(retailer, "2025-12-01", 89.97))
        .unwrap()
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-moderator-id", "mod-7")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

// ========== Ingestion ==========

#[tokio::test]
async fn test_process_receipt() {
    let (app, pipeline) = setup_test_app();

    let response = app
        .oneshot(post_json(
            "/api/process-receipt",
            serde_json::json!({ "imageUrl": "https://cdn.example.com/a.jpg", "userId": "user-3" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["isDuplicate"], false);
    assert_eq!(json["status"], "manual_review");
    assert_eq!(json["data"]["retailer_name"], "SPAR");
    assert_eq!(json["data"]["date"], "12/01/2025");
    assert_eq!(json["data"]["slip_total"], 141.13);

    let id = json["receiptId"].as_i64().unwrap();
    let slip = pipeline.db().get_slip(id).unwrap().unwrap();
    assert_eq!(slip.user_id.as_deref(), Some("user-3"));
}

#[tokio::test]
async fn test_process_receipt_requires_image_url() {
    let (app, _) = setup_test_app();

    let response = app
        .oneshot(post_json("/api/process-receipt", serde_json::json!({ "userId": "u" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert_eq!(json["error"], "imageUrl is required");
}

#[tokio::test]
async fn test_process_receipt_second_upload_is_duplicate() {
    let (app, _) = setup_test_app();
    let body = serde_json::json!({ "imageUrl": "https://cdn.example.com/a.jpg" });

    let first = get_body_json(
        app.clone()
            .oneshot(post_json("/api/process-receipt", body.clone()))
            .await
            .unwrap(),
    )
    .await;
    let second = get_body_json(
        app.oneshot(post_json("/api/process-receipt", body))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(second["success"], true);
    assert_eq!(second["isDuplicate"], true);
    assert_eq!(second["duplicateOf"], first["receiptId"]);
    assert_eq!(second["data"]["is_duplicate"], true);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let request = Request::builder()
        .method("POST")
        .uri("/api/process-receipt")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().is_some());

    let response = app
        .oneshot(post_json(
            &format!("/api/slips/{}/reject", id),
            serde_json::json!({ "reason": 5 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().is_some());
    assert_eq!(
        pipeline.db().get_slip(id).unwrap().unwrap().status,
        SlipStatus::ManualReview
    );
}

#[tokio::test]
async fn test_process_receipt_ocr_failure_is_500() {
    let config = PipelineConfig {
        retry: RetryPolicy::none(),
        ..Default::default()
    };
    let pipeline = Pipeline::new(
        Database::in_memory().unwrap(),
        OcrClient::Mock(slipdesk_core::ocr::MockBackend::unhealthy()),
        config,
    );
    let app = create_router(pipeline.clone(), open_config());

    let response = app
        .oneshot(post_json(
            "/api/process-receipt",
            serde_json::json!({ "imageUrl": "https://cdn.example.com/a.jpg" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("unhealthy"));
    assert_eq!(pipeline.db().count_slips(&Default::default()).unwrap(), 0);
}

#[tokio::test]
async fn test_process_bulk() {
    let (app, pipeline) = setup_test_app();

    let response = app
        .oneshot(post_json(
            "/api/process-receipts/bulk",
            serde_json::json!({
                "imageUrls": ["https://x/1.jpg", "https://x/2.jpg", "https://x/3.jpg"],
                "concurrency": 3
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["total"], 3);
    assert_eq!(json["completed"], 3);
    assert_eq!(json["failed"], 0);
    assert_eq!(json["results"].as_array().unwrap().len(), 3);

    // The mock returns the same slip every time, so one original remains
    let originals = pipeline
        .db()
        .list_slips(&Default::default())
        .unwrap()
        .into_iter()
        .filter(|s| !s.is_duplicate)
        .count();
    assert_eq!(originals, 1);
}

#[tokio::test]
async fn test_process_bulk_rejects_unsupported_concurrency() {
    let (app, _) = setup_test_app();

    let response = app
        .oneshot(post_json(
            "/api/process-receipts/bulk",
            serde_json::json!({ "imageUrls": ["https://x/1.jpg"], "concurrency": 4 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ========== Queue ==========

#[tokio::test]
async fn test_list_slips_with_filters() {
    let (app, pipeline) = setup_test_app();
    seed_slip(&pipeline, "SPAR");
    seed_slip(&pipeline, "CHECKERS");

    let response = app
        .clone()
        .oneshot(get("/api/slips?status=manual_review&retailer=spar"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["slips"][0]["retailer_name"], "SPAR");

    let response = app.oneshot(get("/api/slips?status=bogus")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_slip_detail() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let response = app
        .oneshot(get(&format!("/api/slips/{}", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["id"], id);
    assert!(json["line_items"].is_array());
    assert!(json["validation"].is_object());
    assert!(json["fraud_analysis"].is_object());
}

#[tokio::test]
async fn test_get_missing_slip_is_404() {
    let (app, _) = setup_test_app();

    let response = app.oneshot(get("/api/slips/999")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = get_body_json(response).await;
    assert_eq!(json["error"], "Slip not found");
}

#[tokio::test]
async fn test_export_slip() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let response = app
        .oneshot(get(&format!("/api/slips/{}/export", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["retailer_name"], "SPAR");
    assert_eq!(json["date"], "12/01/2025");
}

#[tokio::test]
async fn test_delete_slip() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let delete = |id: i64| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/slips/{}", id))
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(delete(id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(pipeline.db().get_slip(id).unwrap().is_none());

    let response = app.oneshot(delete(id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Moderation ==========

#[tokio::test]
async fn test_approve_slip() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let response = app
        .oneshot(post_json(
            &format!("/api/slips/{}/approve", id),
            serde_json::json!({ "expected_status": "manual_review" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "approved");
    assert_eq!(json["reviewed_by"], "mod-7");

    let log = pipeline.db().list_activity(id).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, ActivityAction::Approved);
    assert_eq!(log[0].moderator_id.as_deref(), Some("mod-7"));
}

#[tokio::test]
async fn test_approve_without_body_uses_default_moderator() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/slips/{}/approve", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let log = pipeline.db().list_activity(id).unwrap();
    assert_eq!(log[0].moderator_id.as_deref(), Some(DEFAULT_MODERATOR));
}

#[tokio::test]
async fn test_stale_expected_status_is_409() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let response = app
        .oneshot(post_json(
            &format!("/api/slips/{}/reject", id),
            serde_json::json!({ "reason": "Other", "expected_status": "pending" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let slip = pipeline.db().get_slip(id).unwrap().unwrap();
    assert_eq!(slip.status, SlipStatus::ManualReview);
}

#[tokio::test]
async fn test_reject_then_terminal() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/slips/{}/reject", id),
            serde_json::json!({ "reason": "Duplicate submission" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "rejected");

    // Rejected is terminal
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/slips/{}/approve", id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Notes are still accepted
    let response = app
        .oneshot(post_json(
            &format!("/api/slips/{}/notes", id),
            serde_json::json!({ "note": "customer called" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(pipeline.db().list_activity(id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_reject_requires_reason() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let response = app
        .oneshot(post_json(
            &format!("/api/slips/{}/reject", id),
            serde_json::json!({ "reason": "   " }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_correct_slip() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let response = app
        .oneshot(post_json(
            &format!("/api/slips/{}/correct", id),
            serde_json::json!({
                "fields": { "receipt_number": "000777", "total_amount": 90.0 },
                "expected_status": "manual_review"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "corrected");
    assert_eq!(json["was_corrected"], true);

    let slip = pipeline.db().get_slip(id).unwrap().unwrap();
    assert_eq!(slip.effective_total(), 90.0);
    assert_eq!(slip.total_amount, 89.97);
}

#[tokio::test]
async fn test_correct_with_no_changes_is_400() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let response = app
        .oneshot(post_json(
            &format!("/api/slips/{}/correct", id),
            serde_json::json!({ "fields": { "retailer_name": "SPAR" } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_escalate_slip() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");

    let response = app
        .oneshot(post_json(
            &format!("/api/slips/{}/escalate", id),
            serde_json::json!({ "note": "looks edited" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "manual_review");
    assert_eq!(json["review_notes"], "ESCALATED: looks edited");
}

#[tokio::test]
async fn test_rejection_reasons() {
    let (app, _) = setup_test_app();

    let response = app.oneshot(get("/api/rejection-reasons")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let reasons = json.as_array().unwrap();
    assert_eq!(reasons.len(), 7);
    assert_eq!(reasons[1], "Duplicate submission");
}

// ========== Activity & Dashboard ==========

#[tokio::test]
async fn test_activity_endpoints() {
    let (app, pipeline) = setup_test_app();
    let id = seed_slip(&pipeline, "SPAR");
    pipeline
        .moderate(
            id,
            slipdesk_core::ModeratorAction::AddNote {
                note: "first look".into(),
            },
            "mod-1",
            None,
        )
        .unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/slips/{}/activity", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["action"], "noted");

    let response = app
        .clone()
        .oneshot(get("/api/activity?limit=5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let response = app.oneshot(get("/api/slips/999/activity")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dashboard() {
    let (app, pipeline) = setup_test_app();
    seed_slip(&pipeline, "SPAR");

    let response = app.oneshot(get("/api/dashboard")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["counts"]["pending_review"], 1);
    assert_eq!(json["volume"].as_array().unwrap().len(), 31);
    assert_eq!(json["currency"], "ZAR");
}

#[tokio::test]
async fn test_change_events_stream() {
    let (app, _) = setup_test_app();

    let response = app
        .clone()
        .oneshot(get("/api/events?table=slips&op=insert,update"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let response = app.oneshot(get("/api/events?table=receipts")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ========== Security ==========

fn secured_app() -> Router {
    let config = ServerConfig {
        require_auth: true,
        api_keys: vec!["s3cret".to_string()],
        ..Default::default()
    };
    create_router(test_pipeline(), config)
}

#[tokio::test]
async fn test_auth_required() {
    let response = secured_app().oneshot(get("/api/slips")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = get_body_json(response).await;
    assert_eq!(json["error"], "Authentication required");
}

#[tokio::test]
async fn test_auth_with_wrong_key() {
    let response = secured_app()
        .oneshot(
            Request::builder()
                .uri("/api/slips")
                .header("x-api-key", "s3cre")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_with_header() {
    let response = secured_app()
        .oneshot(
            Request::builder()
                .uri("/api/slips")
                .header("x-api-key", "s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_auth_with_bearer_token() {
    let response = secured_app()
        .oneshot(
            Request::builder()
                .uri("/api/slips")
                .header("authorization", "Bearer s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_is_unauthenticated() {
    let response = secured_app().oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_security_headers() {
    let (app, _) = setup_test_app();

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
}

#[test]
fn test_parse_api_keys() {
    assert_eq!(parse_api_keys("a, b,,c "), vec!["a", "b", "c"]);
    assert!(parse_api_keys("").is_empty());
}

#[test]
fn test_validate_api_key() {
    let keys = vec!["alpha".to_string(), "beta".to_string()];
    assert!(validate_api_key("beta", &keys));
    assert!(!validate_api_key("bet", &keys));
    assert!(!validate_api_key("", &keys));
}

#[test]
fn test_moderator_header_fallback() {
    let mut headers = HeaderMap::new();
    assert_eq!(get_moderator_id(&headers), DEFAULT_MODERATOR);
    headers.insert("x-moderator-id", HeaderValue::from_static("  mod-9 "));
    assert_eq!(get_moderator_id(&headers), "mod-9");
}
