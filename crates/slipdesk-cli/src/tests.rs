//! CLI command tests

use std::io::Write;

use slipdesk_core::db::Database;
use slipdesk_core::models::{ActivityAction, RiskLevel, SlipStatus};
use slipdesk_core::test_utils::sample_new_slip;
use slipdesk_core::{ModeratorAction, OcrClient, Pipeline, PipelineConfig, RetryPolicy};

use crate::commands::{self, truncate, yes_no};

fn setup_pipeline() -> Pipeline {
    let config = PipelineConfig {
        retry: RetryPolicy::none(),
        ..Default::default()
    };
    Pipeline::new(Database::in_memory().unwrap(), OcrClient::mock(), config)
}

/// Insert a slip waiting in manual review, returning its id
fn seed_slip(pipeline: &Pipeline, retailer: &str, total: f64) -> i64 {
    pipeline
        .db()
        .insert_slip(&sample_new_slip(retailer, "2025-12-01", total))
        .unwrap()
}

// ========== Helpers ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("SPAR", 10), "SPAR");
    assert_eq!(truncate("PICK N PAY HYPER", 10), "PICK N ...");
    // Multi-byte text is cut on character boundaries
    assert_eq!(truncate("ÉÉÉÉÉÉÉÉ", 6), "ÉÉÉ...");
}

#[test]
fn test_yes_no() {
    assert_eq!(yes_no(Some(true)), "yes");
    assert_eq!(yes_no(Some(false)), "no");
    assert_eq!(yes_no(None), "unknown");
}

#[test]
fn test_build_filter() {
    let filter = commands::build_filter(
        Some("manual_review"),
        Some("HIGH"),
        Some("spar"),
        Some("2025-12-01"),
        None,
        true,
        50,
    )
    .unwrap();
    assert_eq!(filter.status, Some(SlipStatus::ManualReview));
    assert_eq!(filter.risk_level, Some(RiskLevel::High));
    assert_eq!(filter.retailer.as_deref(), Some("spar"));
    assert!(filter.from_date.is_some());
    assert!(filter.to_date.is_none());
    assert!(filter.duplicates_only);
    assert_eq!(filter.limit, Some(50));
}

#[test]
fn test_build_filter_rejects_bad_values() {
    assert!(commands::build_filter(Some("done"), None, None, None, None, false, 20).is_err());
    let err = commands::build_filter(None, None, None, Some("01/12/2025"), None, false, 20)
        .unwrap_err();
    assert!(err.to_string().contains("--from"));
}

#[test]
fn test_parse_expected() {
    assert_eq!(commands::parse_expected(None).unwrap(), None);
    assert_eq!(
        commands::parse_expected(Some("pending")).unwrap(),
        Some(SlipStatus::Pending)
    );
    assert!(commands::parse_expected(Some("waiting")).is_err());
}

#[test]
fn test_parse_corrections() {
    let corrections = commands::parse_corrections(
        &["total_amount=89.97".to_string(), "receipt_number=000777".to_string()],
        &["12.unit_price=9.99".to_string(), "12.quantity=2".to_string()],
    )
    .unwrap();

    assert_eq!(corrections.fields.len(), 2);
    // Leading zeros survive because values stay text
    assert_eq!(corrections.fields["receipt_number"], "000777");
    assert_eq!(corrections.line_items.len(), 1);
    assert_eq!(corrections.line_items[0].id, 12);
    assert_eq!(corrections.line_items[0].fields.len(), 2);
}

#[test]
fn test_parse_corrections_rejects_malformed() {
    assert!(commands::parse_corrections(&["total_amount".to_string()], &[]).is_err());
    assert!(commands::parse_corrections(&["=5".to_string()], &[]).is_err());
    assert!(commands::parse_corrections(&[], &["x.unit_price=1".to_string()]).is_err());
    assert!(commands::parse_corrections(&[], &["12unit_price=1".to_string()]).is_err());
}

#[test]
fn test_read_url_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# batch from the Sea Point store").unwrap();
    writeln!(file, "https://cdn.example.com/1.jpg").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "  https://cdn.example.com/2.jpg  ").unwrap();

    let urls = commands::read_url_file(file.path()).unwrap();
    assert_eq!(
        urls,
        vec![
            "https://cdn.example.com/1.jpg",
            "https://cdn.example.com/2.jpg"
        ]
    );
}

// ========== Init ==========

#[test]
fn test_cmd_init_creates_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slipdesk.db");

    commands::cmd_init(&path, true).unwrap();
    assert!(path.exists());

    // Reopening runs migrations again without error
    let db = commands::open_db(&path, true).unwrap();
    assert_eq!(db.count_slips(&Default::default()).unwrap(), 0);
}

// ========== Ingestion ==========

#[tokio::test]
async fn test_cmd_process() {
    let pipeline = setup_pipeline();

    let outcome = commands::cmd_process(&pipeline, "https://cdn.example.com/a.jpg", Some("u-1"))
        .await
        .unwrap();

    let slip = pipeline.db().get_slip(outcome.slip_id).unwrap().unwrap();
    assert_eq!(slip.retailer_name, "SPAR");
    assert_eq!(slip.user_id.as_deref(), Some("u-1"));
}

#[tokio::test]
async fn test_cmd_bulk_merges_file_and_args() {
    let pipeline = setup_pipeline();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "https://cdn.example.com/2.jpg").unwrap();
    writeln!(file, "https://cdn.example.com/3.jpg").unwrap();

    let report = commands::cmd_bulk(
        &pipeline,
        vec!["https://cdn.example.com/1.jpg".to_string()],
        Some(file.path()),
        Some(1),
        None,
    )
    .await
    .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.completed, 3);
    assert_eq!(report.results[1].image_url, "https://cdn.example.com/2.jpg");
    // Same canned slip every time: one original, two duplicates
    let duplicates = report
        .results
        .iter()
        .filter_map(|r| r.outcome())
        .filter(|o| o.is_duplicate)
        .count();
    assert_eq!(duplicates, 2);
}

#[tokio::test]
async fn test_cmd_bulk_validation() {
    let pipeline = setup_pipeline();

    let err = commands::cmd_bulk(&pipeline, vec![], None, None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No image URLs"));

    let err = commands::cmd_bulk(&pipeline, vec!["https://x/1.jpg".into()], None, Some(7), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("concurrency"));
}

// ========== Queue ==========

#[test]
fn test_cmd_slips_list_and_show() {
    let pipeline = setup_pipeline();
    let id = seed_slip(&pipeline, "SPAR", 89.97);
    seed_slip(&pipeline, "CHECKERS", 12.50);

    let filter = commands::build_filter(None, None, Some("spar"), None, None, false, 20).unwrap();
    assert!(commands::cmd_slips_list(pipeline.db(), &filter).is_ok());
    assert!(commands::cmd_slips_show(&pipeline, id).is_ok());

    let err = commands::cmd_slips_show(&pipeline, 999).unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_cmd_slips_list_empty() {
    let pipeline = setup_pipeline();
    let filter = commands::build_filter(None, None, None, None, None, false, 20).unwrap();
    assert!(commands::cmd_slips_list(pipeline.db(), &filter).is_ok());
}

#[test]
fn test_cmd_slips_export_and_delete() {
    let pipeline = setup_pipeline();
    let id = seed_slip(&pipeline, "SPAR", 89.97);

    assert!(commands::cmd_slips_export(pipeline.db(), id).is_ok());
    commands::cmd_slips_delete(pipeline.db(), id).unwrap();
    assert!(pipeline.db().get_slip(id).unwrap().is_none());

    assert!(commands::cmd_slips_export(pipeline.db(), id).is_err());
    assert!(commands::cmd_slips_delete(pipeline.db(), id).is_err());
}

// ========== Review ==========

#[test]
fn test_cmd_review_approve() {
    let pipeline = setup_pipeline();
    let id = seed_slip(&pipeline, "SPAR", 89.97);

    let detail = commands::cmd_review(
        &pipeline,
        id,
        ModeratorAction::Approve,
        "cli-tester",
        Some(SlipStatus::ManualReview),
    )
    .unwrap();
    assert_eq!(detail.slip.status, SlipStatus::Approved);
    assert_eq!(detail.slip.reviewed_by.as_deref(), Some("cli-tester"));

    // Terminal: a second decision is refused
    let err = commands::cmd_review(&pipeline, id, ModeratorAction::Approve, "cli-tester", None)
        .unwrap_err();
    assert!(err.to_string().contains("approve"));
}

#[test]
fn test_cmd_review_stale_expectation() {
    let pipeline = setup_pipeline();
    let id = seed_slip(&pipeline, "SPAR", 89.97);

    let result = commands::cmd_review(
        &pipeline,
        id,
        ModeratorAction::Reject {
            reason: "Other".into(),
        },
        "cli-tester",
        Some(SlipStatus::Pending),
    );
    assert!(result.is_err());
    let slip = pipeline.db().get_slip(id).unwrap().unwrap();
    assert_eq!(slip.status, SlipStatus::ManualReview);
}

#[test]
fn test_cmd_review_correct() {
    let pipeline = setup_pipeline();
    let id = seed_slip(&pipeline, "SPAR", 89.97);

    let detail = commands::cmd_review_correct(
        &pipeline,
        id,
        &["total_amount=90.50".to_string()],
        &[],
        "cli-tester",
        None,
    )
    .unwrap();

    assert_eq!(detail.slip.status, SlipStatus::Corrected);
    assert_eq!(detail.slip.effective_total(), 90.5);
    assert_eq!(detail.slip.total_amount, 89.97);

    let log = pipeline.db().list_activity(id).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, ActivityAction::Corrected);
}

#[test]
fn test_cmd_review_reasons() {
    assert!(commands::cmd_review_reasons().is_ok());
}

// ========== Activity, dashboard, reconcile ==========

#[test]
fn test_cmd_activity() {
    let pipeline = setup_pipeline();
    let id = seed_slip(&pipeline, "SPAR", 89.97);
    pipeline
        .moderate(
            id,
            ModeratorAction::AddNote {
                note: "checked till roll".into(),
            },
            "mod-1",
            None,
        )
        .unwrap();

    assert!(commands::cmd_activity(pipeline.db(), Some(id), 20).is_ok());
    assert!(commands::cmd_activity(pipeline.db(), None, 20).is_ok());
    assert!(commands::cmd_activity(pipeline.db(), Some(999), 20).is_err());
}

#[tokio::test]
async fn test_cmd_dashboard_once() {
    let pipeline = setup_pipeline();
    seed_slip(&pipeline, "SPAR", 89.97);

    let result = commands::cmd_dashboard(pipeline.db(), pipeline.config(), false).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cmd_reconcile() {
    let pipeline = setup_pipeline();
    pipeline
        .process("https://cdn.example.com/a.jpg", None)
        .await
        .unwrap();
    assert_eq!(commands::cmd_reconcile(&pipeline).unwrap(), 0);

    pipeline
        .db()
        .conn()
        .unwrap()
        .execute_batch("DELETE FROM slip_line_items; DELETE FROM slip_payments;")
        .unwrap();

    assert_eq!(commands::cmd_reconcile(&pipeline).unwrap(), 1);
    assert!(pipeline.find_incomplete().unwrap().is_empty());
}
