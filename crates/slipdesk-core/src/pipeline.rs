//! Ingestion pipeline and moderation service
//!
//! One upload runs: OCR (with retry) -> map + normalize -> duplicate check ->
//! validation + fraud scoring -> initial status -> persist. The slip row is
//! the primary write and its failure fails the upload. Line items, payments
//! and the system activity entry are secondary writes: failures are logged
//! and returned as warnings, and [`Pipeline::reconcile`] can repair them.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::db::{Database, IncompleteSlip};
use crate::duplicate::{check_duplicate, DuplicateCheck, Fingerprint};
use crate::error::{Error, Result};
use crate::mapper::{export_receipt, map_ocr_response};
use crate::models::{ExportedReceipt, NewSlip, ProcessedReceipt, Slip, SlipDetail, SlipStatus};
use crate::moderation::{
    build_corrected_data, check_expected_status, moderator_transition, system_transition,
    Corrections, ModeratorAction, SystemEvent, Transition,
};
use crate::ocr::{OcrClient, OcrExtraction, OcrResponse};
use crate::scoring::{assess_fraud, validate, FraudAssessment, ValidationInput, ValidationReport};

/// Result of ingesting one slip image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub slip_id: i64,
    pub is_duplicate: bool,
    pub duplicate_of: Option<i64>,
    pub status: SlipStatus,
    pub validation: ValidationReport,
    pub fraud: FraudAssessment,
    pub exported: ExportedReceipt,
    /// Secondary writes that failed; the slip itself was stored
    pub warnings: Vec<String>,
}

/// What a reconcile pass repaired
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub slip_id: i64,
    pub items_inserted: usize,
    pub payments_inserted: usize,
}

/// Everything computed for a slip before it is written
struct Assessed {
    new_slip: NewSlip,
    classification: Transition,
    validation: ValidationReport,
    fraud: FraudAssessment,
}

/// Ingestion and moderation over one database
#[derive(Clone)]
pub struct Pipeline {
    db: Database,
    ocr: OcrClient,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(db: Database, ocr: OcrClient, config: PipelineConfig) -> Self {
        Self { db, ocr, config }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn ocr(&self) -> &OcrClient {
        &self.ocr
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest one slip image
    pub async fn process(&self, image_url: &str, user_id: Option<&str>) -> Result<IngestOutcome> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(Error::InvalidData("imageUrl is required".into()));
        }

        let extraction = self
            .ocr
            .extract_with_retry(image_url, &self.config.retry)
            .await
            .map_err(|e| {
                warn!(image_url, error = %e, "OCR extraction failed");
                e
            })?;

        self.ingest_extraction(image_url, user_id, extraction, Utc::now().date_naive())
    }

    /// Everything after OCR, with an explicit evaluation date
    pub fn ingest_extraction(
        &self,
        image_url: &str,
        user_id: Option<&str>,
        extraction: OcrExtraction,
        today: NaiveDate,
    ) -> Result<IngestOutcome> {
        let processing = system_transition(SlipStatus::Pending, SystemEvent::OcrCompleted)?;
        let receipt = map_ocr_response(&extraction.response, self.config.missing_date, today);
        let fingerprint = Fingerprint::of(&receipt);

        let duplicate = check_duplicate(&fingerprint, Some(&self.db));
        let mut assessed = self.assess(
            image_url,
            user_id,
            &extraction,
            &receipt,
            &fingerprint,
            duplicate,
            processing.to,
            today,
        )?;

        let slip_id = match self.db.insert_slip(&assessed.new_slip) {
            Ok(id) => id,
            // Another upload stored the same fingerprint between our check and insert
            Err(Error::Conflict(_)) if !duplicate.is_duplicate => {
                let recheck = check_duplicate(&fingerprint, Some(&self.db));
                if !recheck.is_duplicate {
                    return Err(Error::Conflict(format!(
                        "Slip fingerprint {} conflicted but no original was found",
                        fingerprint
                    )));
                }
                info!(
                    %fingerprint,
                    duplicate_of = ?recheck.matched_id,
                    "Lost fingerprint race, storing slip as duplicate"
                );
                assessed = self.assess(
                    image_url,
                    user_id,
                    &extraction,
                    &receipt,
                    &fingerprint,
                    recheck,
                    processing.to,
                    today,
                )?;
                self.db.insert_slip(&assessed.new_slip)?
            }
            Err(e) => return Err(e),
        };

        let mut warnings = Vec::new();

        if let Some(activity) = &assessed.classification.activity {
            if let Err(e) = self.db.insert_activity(slip_id, activity) {
                error!(slip_id, table = "activity_log", error = %e, "Secondary insert failed");
                warnings.push(format!("Failed to record system decision: {}", e));
            }
        }

        if !receipt.items.is_empty() {
            if let Err(e) = self.db.insert_line_items(slip_id, &receipt.items) {
                error!(slip_id, table = "slip_line_items", error = %e, "Secondary insert failed");
                warnings.push(format!("Failed to store line items: {}", e));
            }
        }

        if !receipt.payments.is_empty() {
            if let Err(e) = self.db.insert_payments(slip_id, &receipt.payments) {
                error!(slip_id, table = "slip_payments", error = %e, "Secondary insert failed");
                warnings.push(format!("Failed to store payments: {}", e));
            }
        }

        let new_slip = &assessed.new_slip;
        info!(
            slip_id,
            retailer = %receipt.retailer,
            status = %new_slip.status,
            is_duplicate = new_slip.is_duplicate,
            risk = ?new_slip.fraud_risk_level,
            "Slip ingested"
        );

        Ok(IngestOutcome {
            slip_id,
            is_duplicate: new_slip.is_duplicate,
            duplicate_of: new_slip.duplicate_of,
            status: new_slip.status,
            exported: export_receipt(&receipt, image_url, new_slip.is_duplicate),
            validation: assessed.validation,
            fraud: assessed.fraud,
            warnings,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn assess(
        &self,
        image_url: &str,
        user_id: Option<&str>,
        extraction: &OcrExtraction,
        receipt: &ProcessedReceipt,
        fingerprint: &Fingerprint,
        duplicate: DuplicateCheck,
        status: SlipStatus,
        today: NaiveDate,
    ) -> Result<Assessed> {
        let validation = validate(&ValidationInput::from_receipt(receipt), &self.config, today);
        let fraud = assess_fraud(receipt, &duplicate, &self.config.risk_bands);
        let classification = system_transition(
            status,
            SystemEvent::Classified {
                recommendation: receipt.details.recommended_action,
                has_flags: !fraud.flags.is_empty(),
            },
        )?;

        let ai_cost_usd = extraction
            .usage
            .map(|u| self.config.cost.call_cost_usd(u.input_tokens, u.output_tokens));

        let new_slip = NewSlip {
            image_url: image_url.to_string(),
            user_id: user_id.map(str::to_string),
            status: classification.to,
            ai_processing_time_ms: Some(extraction.duration_ms),
            ai_model_used: Some(extraction.model.clone()),
            ai_cost_usd,
            ai_response: Some(serde_json::to_value(&extraction.response)?),
            receipt: receipt.clone(),
            approved_retailer: validation.approved_retailer.as_option(),
            slip_within_7_days: validation.within_freshness_window.as_option(),
            is_valid: validation.overall.as_option(),
            fraud_risk_score: Some(fraud.score),
            fraud_risk_level: Some(fraud.level),
            fraud_flags: fraud.flags.clone(),
            fingerprint: fingerprint.to_string(),
            is_duplicate: duplicate.is_duplicate,
            duplicate_of: duplicate.matched_id,
        };

        Ok(Assessed {
            new_slip,
            classification,
            validation,
            fraud,
        })
    }

    /// Slips whose stored line items or payments disagree with the extraction
    pub fn find_incomplete(&self) -> Result<Vec<IncompleteSlip>> {
        self.db.find_incomplete_slips()
    }

    /// Re-derive missing line items and payments from the stored AI response
    pub fn reconcile(&self, slip_id: i64) -> Result<ReconcileReport> {
        let slip = self
            .db
            .get_slip(slip_id)?
            .ok_or_else(|| Error::NotFound(format!("Slip {}", slip_id)))?;
        let raw = slip.ai_response.clone().ok_or_else(|| {
            Error::InvalidData(format!("Slip {} has no stored AI response", slip_id))
        })?;
        let response: OcrResponse = serde_json::from_value(raw)?;
        let receipt = map_ocr_response(
            &response,
            self.config.missing_date,
            slip.created_at.date_naive(),
        );

        let (stored_items, stored_payments) = self.db.child_counts(slip_id)?;
        let mut report = ReconcileReport {
            slip_id,
            ..Default::default()
        };

        if stored_items == 0 && !receipt.items.is_empty() {
            report.items_inserted = self.db.insert_line_items(slip_id, &receipt.items)?;
        }
        if stored_payments == 0 && !receipt.payments.is_empty() {
            report.payments_inserted = self.db.insert_payments(slip_id, &receipt.payments)?;
        }

        info!(
            slip_id,
            items = report.items_inserted,
            payments = report.payments_inserted,
            "Reconciled slip"
        );
        Ok(report)
    }

    /// Validation checklist for a stored slip, corrections applied
    pub fn validation_for(&self, slip: &Slip, today: NaiveDate) -> ValidationReport {
        validate(&ValidationInput::from_slip(slip), &self.config, today)
    }

    /// Apply a moderator action and return the updated slip
    pub fn moderate(
        &self,
        slip_id: i64,
        action: ModeratorAction,
        moderator_id: &str,
        expected_status: Option<SlipStatus>,
    ) -> Result<SlipDetail> {
        let detail = self.load(slip_id)?;
        check_expected_status(detail.slip.status, expected_status)?;
        let transition = moderator_transition(detail.slip.status, &action, moderator_id)?;

        let validation = transition.corrected_data.as_ref().map(|data| {
            let mut corrected = detail.slip.clone();
            corrected.corrected_data = Some(data.clone());
            self.validation_for(&corrected, Utc::now().date_naive())
        });

        self.db
            .apply_transition(slip_id, &transition, validation.as_ref())?;
        info!(
            slip_id,
            moderator = moderator_id,
            action = action.verb(),
            to = %transition.to,
            "Moderator action applied"
        );
        self.load(slip_id)
    }

    /// Approve a slip with field corrections
    pub fn correct(
        &self,
        slip_id: i64,
        corrections: &Corrections,
        moderator_id: &str,
        expected_status: Option<SlipStatus>,
    ) -> Result<SlipDetail> {
        let detail = self.load(slip_id)?;
        let data = build_corrected_data(&detail, corrections)?;
        self.moderate(
            slip_id,
            ModeratorAction::Correct { corrections: data },
            moderator_id,
            expected_status,
        )
    }

    fn load(&self, slip_id: i64) -> Result<SlipDetail> {
        self.db
            .get_slip_detail(slip_id)?
            .ok_or_else(|| Error::NotFound(format!("Slip {}", slip_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityAction, RecommendedAction};
    use crate::ocr::{Confident, MockBackend, Number, OcrBackend};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 3).unwrap()
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Database::in_memory().unwrap(),
            OcrClient::mock(),
            PipelineConfig::default(),
        )
    }

    async fn canned() -> OcrExtraction {
        MockBackend::new().extract("slip.jpg").await.unwrap()
    }

    #[tokio::test]
    async fn test_ingest_canned_slip() {
        let p = pipeline();
        let outcome = p
            .ingest_extraction("slip.jpg", Some("user-1"), canned().await, today())
            .unwrap();

        assert!(!outcome.is_duplicate);
        assert!(outcome.warnings.is_empty());
        // Canned slip carries no recommendation
        assert_eq!(outcome.status, SlipStatus::ManualReview);
        assert_eq!(outcome.exported.retailer_name, "SPAR");
        assert_eq!(outcome.exported.date, "12/01/2025");

        let detail = p.db().get_slip_detail(outcome.slip_id).unwrap().unwrap();
        assert_eq!(detail.slip.user_id.as_deref(), Some("user-1"));
        assert_eq!(detail.line_items.len(), 1);
        assert_eq!(detail.payments.len(), 1);
        assert_eq!(detail.slip.line_items_count, 1);
        assert!(detail.slip.ai_response.is_some());

        let activity = p.db().list_activity(outcome.slip_id).unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].actor(), "System");
        assert_eq!(activity[0].action, ActivityAction::Escalated);
    }

    #[tokio::test]
    async fn test_auto_decisions() {
        let p = pipeline();

        let mut extraction = canned().await;
        extraction.response.recommended_action = Some("AUTO_REJECT".into());
        let rejected = p
            .ingest_extraction("a.jpg", None, extraction, today())
            .unwrap();
        assert_eq!(rejected.status, SlipStatus::AutoRejected);

        let mut extraction = canned().await;
        extraction.response.total = Some(Confident::new(Number(12.99), 90.0));
        extraction.response.recommended_action = Some("auto_approve".into());
        let approved = p
            .ingest_extraction("b.jpg", None, extraction, today())
            .unwrap();
        assert!(approved.fraud.flags.is_empty());
        assert_eq!(approved.status, SlipStatus::AutoApproved);
        assert_eq!(
            p.db().list_activity(approved.slip_id).unwrap()[0].action,
            ActivityAction::Approved
        );
    }

    #[tokio::test]
    async fn test_duplicate_upload() {
        let p = pipeline();
        let first = p
            .ingest_extraction("a.jpg", None, canned().await, today())
            .unwrap();
        let second = p
            .ingest_extraction("b.jpg", None, canned().await, today())
            .unwrap();

        assert!(!first.is_duplicate);
        assert!(second.is_duplicate);
        assert_eq!(second.duplicate_of, Some(first.slip_id));
        assert!(second.fraud.flags.iter().any(|f| f == "duplicate_receipt"));
        assert!(second.exported.is_duplicate);
    }

    #[tokio::test]
    async fn test_process_rejects_empty_url() {
        let err = pipeline().process("  ", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_reconcile_restores_children() {
        let p = pipeline();
        let outcome = p
            .ingest_extraction("a.jpg", None, canned().await, today())
            .unwrap();
        p.db()
            .conn()
            .unwrap()
            .execute_batch("DELETE FROM slip_line_items; DELETE FROM slip_payments;")
            .unwrap();

        let incomplete = p.find_incomplete().unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].slip_id, outcome.slip_id);
        assert_eq!(incomplete[0].expected_items, 1);

        let report = p.reconcile(outcome.slip_id).unwrap();
        assert_eq!(report.items_inserted, 1);
        assert_eq!(report.payments_inserted, 1);
        assert!(p.find_incomplete().unwrap().is_empty());

        // Second pass is a no-op
        let report = p.reconcile(outcome.slip_id).unwrap();
        assert_eq!(report.items_inserted, 0);
    }

    #[tokio::test]
    async fn test_reconcile_restores_missing_payments() {
        let p = pipeline();
        let outcome = p
            .ingest_extraction("a.jpg", None, canned().await, today())
            .unwrap();
        p.db()
            .conn()
            .unwrap()
            .execute_batch("DELETE FROM slip_payments;")
            .unwrap();

        let incomplete = p.find_incomplete().unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].expected_payments, 1);
        assert_eq!(incomplete[0].stored_payments, 0);

        let report = p.reconcile(outcome.slip_id).unwrap();
        assert_eq!(report.items_inserted, 0);
        assert_eq!(report.payments_inserted, 1);
        assert!(p.find_incomplete().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_child_insert_keeps_slip() {
        let p = pipeline();
        p.db()
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_payments BEFORE INSERT ON slip_payments
                 BEGIN SELECT RAISE(ABORT, 'payments unavailable'); END;",
            )
            .unwrap();

        let outcome = p
            .ingest_extraction("a.jpg", None, canned().await, today())
            .unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("payments"));
        let detail = p.db().get_slip_detail(outcome.slip_id).unwrap().unwrap();
        assert_eq!(detail.line_items.len(), 1);
        assert!(detail.payments.is_empty());

        let incomplete = p.find_incomplete().unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].slip_id, outcome.slip_id);

        p.db()
            .conn()
            .unwrap()
            .execute_batch("DROP TRIGGER reject_payments;")
            .unwrap();
        assert_eq!(p.reconcile(outcome.slip_id).unwrap().payments_inserted, 1);
        assert!(p.find_incomplete().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_correct_revalidates() {
        let p = pipeline();
        let mut extraction = canned().await;
        extraction.response.recommended_action = Some(RecommendedAction::ManualReview.as_str().into());
        let outcome = p
            .ingest_extraction("a.jpg", None, extraction, today())
            .unwrap();

        let corrections: Corrections = serde_json::from_value(serde_json::json!({
            "fields": { "receipt_number": "000777", "slip_date": Utc::now().date_naive().to_string() }
        }))
        .unwrap();
        let detail = p
            .correct(outcome.slip_id, &corrections, "mod-1", Some(SlipStatus::ManualReview))
            .unwrap();

        assert_eq!(detail.slip.status, SlipStatus::Corrected);
        assert!(detail.slip.was_corrected);
        assert_eq!(detail.slip.reviewed_by.as_deref(), Some("mod-1"));
        assert_eq!(detail.slip.slip_within_7_days, Some(true));
        assert_eq!(
            detail.slip.effective_text("receipt_number").as_deref(),
            Some("000777")
        );
        // Corrections live beside the original
        assert_eq!(detail.slip.receipt_number, None);
    }

    #[tokio::test]
    async fn test_corrected_retailer_is_normalized() {
        let p = pipeline();
        let mut extraction = canned().await;
        extraction.response.merchant_detection_sources =
            Some(Confident::new("CORNER CAFE".to_string(), 60.0));
        let outcome = p
            .ingest_extraction("a.jpg", None, extraction, today())
            .unwrap();
        let slip = p.db().get_slip(outcome.slip_id).unwrap().unwrap();
        assert_eq!(slip.approved_retailer, Some(false));

        let corrections: Corrections = serde_json::from_value(serde_json::json!({
            "fields": { "retailer_name": "Spar Rondebosch" }
        }))
        .unwrap();
        let detail = p
            .correct(outcome.slip_id, &corrections, "mod-1", None)
            .unwrap();

        assert_eq!(
            detail.slip.effective_text("retailer_name").as_deref(),
            Some("SPAR")
        );
        assert_eq!(detail.slip.approved_retailer, Some(true));
    }

    #[tokio::test]
    async fn test_moderate_conflicts() {
        let p = pipeline();
        let outcome = p
            .ingest_extraction("a.jpg", None, canned().await, today())
            .unwrap();

        let err = p
            .moderate(
                outcome.slip_id,
                ModeratorAction::Approve,
                "mod-1",
                Some(SlipStatus::Pending),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        p.moderate(outcome.slip_id, ModeratorAction::Approve, "mod-1", None)
            .unwrap();
        let err = p
            .moderate(outcome.slip_id, ModeratorAction::Approve, "mod-1", None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let err = p
            .moderate(999, ModeratorAction::Approve, "mod-1", None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
