//! Validation checklist and fraud scoring
//!
//! Two independent layers:
//! - a deterministic validation checklist (approved retailer, freshness,
//!   sufficient data) with pass/fail/unknown outcomes
//! - fraud risk: the AI-supplied score is authoritative when present; local
//!   deterministic flags are merged in, and a local score is derived from the
//!   flags only when the AI supplied none
//!
//! Risk banding uses one table ([`RiskBands`]) everywhere.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::{PipelineConfig, RiskBands};
use crate::duplicate::DuplicateCheck;
use crate::models::{DefaultedField, ProcessedItem, ProcessedReceipt, RiskLevel, Slip};
use crate::normalize::UNKNOWN_RETAILER;

pub const FLAG_DUPLICATE_RECEIPT: &str = "duplicate_receipt";
pub const FLAG_SCREENSHOT: &str = "screenshot_detected";
pub const FLAG_SLIGHT_BLUR: &str = "slight_blur";
pub const FLAG_NOT_DIRECT_PHOTO: &str = "not_direct_photo";
pub const FLAG_AMOUNT_MISMATCH: &str = "amount_mismatch";

/// Rounding slack when comparing a slip total with its line items
const AMOUNT_TOLERANCE: f64 = 0.01;

/// Outcome of one validation check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Pass,
    Fail,
    Unknown,
}

impl CheckOutcome {
    fn from_bool(ok: bool) -> Self {
        if ok {
            Self::Pass
        } else {
            Self::Fail
        }
    }

    /// Persisted form; None is unknown
    pub fn as_option(&self) -> Option<bool> {
        match self {
            Self::Pass => Some(true),
            Self::Fail => Some(false),
            Self::Unknown => None,
        }
    }
}

/// Slip date as seen by the validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateInput {
    Missing,
    /// Filled in by the mapper rather than read off the slip
    Inferred,
    /// Present but not a real ISO date
    Unparseable(String),
    Parsed(NaiveDate),
}

impl DateInput {
    fn from_stored(value: &str, inferred: bool) -> Self {
        if inferred {
            return Self::Inferred;
        }
        let value = value.trim();
        if value.is_empty() {
            return Self::Missing;
        }
        match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            Ok(date) => Self::Parsed(date),
            Err(_) => Self::Unparseable(value.to_string()),
        }
    }

    fn is_present(&self) -> bool {
        matches!(self, Self::Parsed(_) | Self::Unparseable(_))
    }
}

/// Values the checklist looks at
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationInput {
    pub retailer: Option<String>,
    pub date: DateInput,
    pub total: Option<f64>,
    pub payment_method: Option<String>,
    pub receipt_number: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ValidationInput {
    pub fn from_receipt(receipt: &ProcessedReceipt) -> Self {
        let retailer = (!receipt.was_defaulted(DefaultedField::Retailer)
            && receipt.retailer != UNKNOWN_RETAILER)
            .then(|| receipt.retailer.clone());
        let total = (!receipt.was_defaulted(DefaultedField::Total)).then_some(receipt.total_amount);

        Self {
            retailer,
            date: DateInput::from_stored(&receipt.date, receipt.date_inferred),
            total,
            payment_method: non_empty(receipt.details.payment_method.clone()),
            receipt_number: non_empty(receipt.details.receipt_number.clone()),
        }
    }

    /// Stored slip with moderator corrections taking precedence
    pub fn from_slip(slip: &Slip) -> Self {
        let retailer = non_empty(slip.effective_text("retailer_name"))
            .filter(|r| r != UNKNOWN_RETAILER)
            .filter(|_| {
                slip.is_field_corrected("retailer_name")
                    || !slip.defaults_applied.contains(&DefaultedField::Retailer)
            });

        let date = match slip.effective_text("slip_date") {
            Some(date) if slip.is_field_corrected("slip_date") => {
                DateInput::from_stored(&date, false)
            }
            _ => DateInput::from_stored(&slip.slip_date, slip.date_inferred),
        };

        let total = (slip.is_field_corrected("total_amount")
            || !slip.defaults_applied.contains(&DefaultedField::Total))
        .then(|| slip.effective_total());

        Self {
            retailer,
            date,
            total,
            payment_method: non_empty(slip.effective_text("payment_method")),
            receipt_number: non_empty(slip.effective_text("receipt_number")),
        }
    }
}

/// Result of the validation checklist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub approved_retailer: CheckOutcome,
    pub within_freshness_window: CheckOutcome,
    pub sufficient_data: CheckOutcome,
    pub overall: CheckOutcome,
    /// Required fields that were absent
    pub missing_fields: Vec<String>,
}

/// Run the validation checklist as of `today`
pub fn validate(input: &ValidationInput, config: &PipelineConfig, today: NaiveDate) -> ValidationReport {
    let approved_retailer = match &input.retailer {
        Some(retailer) => CheckOutcome::from_bool(config.is_approved_retailer(retailer)),
        None => CheckOutcome::Unknown,
    };

    let within_freshness_window = match &input.date {
        DateInput::Parsed(date) => {
            let age = (today - *date).num_days();
            CheckOutcome::from_bool((0..=config.freshness_window_days).contains(&age))
        }
        DateInput::Unparseable(_) => CheckOutcome::Fail,
        DateInput::Missing | DateInput::Inferred => CheckOutcome::Unknown,
    };

    let mut missing_fields = Vec::new();
    if input.retailer.is_none() {
        missing_fields.push("retailer".to_string());
    }
    if !input.date.is_present() {
        missing_fields.push("date".to_string());
    }
    if input.total.is_none() {
        missing_fields.push("total".to_string());
    }
    if input.payment_method.is_none() {
        missing_fields.push("payment_method".to_string());
    }
    if input.receipt_number.is_none() {
        missing_fields.push("receipt_number".to_string());
    }
    let sufficient_data = CheckOutcome::from_bool(missing_fields.is_empty());

    let checks = [approved_retailer, within_freshness_window, sufficient_data];
    let overall = if checks.contains(&CheckOutcome::Fail) {
        CheckOutcome::Fail
    } else if checks.contains(&CheckOutcome::Unknown) {
        CheckOutcome::Unknown
    } else {
        CheckOutcome::Pass
    };

    ValidationReport {
        approved_retailer,
        within_freshness_window,
        sufficient_data,
        overall,
        missing_fields,
    }
}

/// Display band of a fraud risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskBand {
    Low,
    Medium,
    High,
    /// Display-only label above the high band
    Critical,
}

impl RiskBand {
    pub fn from_score(score: f64, bands: &RiskBands) -> Self {
        if score <= bands.low_max {
            Self::Low
        } else if score <= bands.medium_max {
            Self::Medium
        } else if score <= bands.high_max {
            Self::High
        } else {
            Self::Critical
        }
    }

    /// Level persisted on the slip; critical is stored as high
    pub fn stored_level(&self) -> RiskLevel {
        match self {
            Self::Low => RiskLevel::Low,
            Self::Medium => RiskLevel::Medium,
            Self::High | Self::Critical => RiskLevel::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Presentation severity of a fraud flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    High,
    Medium,
    Low,
    Unclassified,
}

impl FlagSeverity {
    pub fn of(flag: &str) -> Self {
        match flag {
            "duplicate_receipt" | "different_user" | "metadata_stripped"
            | "tampering_detected" => Self::High,
            "screenshot_detected" | "low_resolution" | "metadata_mismatch" | "slight_blur" => {
                Self::Medium
            }
            "minor_artifact" => Self::Low,
            _ => Self::Unclassified,
        }
    }

    /// Contribution to the local score
    fn weight(&self) -> f64 {
        match self {
            Self::High => 0.6,
            Self::Medium => 0.3,
            Self::Low => 0.1,
            Self::Unclassified => 0.15,
        }
    }
}

/// Analysis section a flag is shown under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagCategory {
    Photo,
    Tampering,
    Consistency,
    Other,
}

impl FlagCategory {
    pub fn of(flag: &str) -> Self {
        match flag {
            "screenshot_detected" | "low_resolution" | "is_scan" | "not_direct_photo" => {
                Self::Photo
            }
            "tampering_detected" | "metadata_stripped" | "metadata_mismatch" | "slight_blur" => {
                Self::Tampering
            }
            "duplicate_receipt" | "different_user" | "amount_mismatch" | "date_inconsistency" => {
                Self::Consistency
            }
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Ai,
    Local,
}

/// Fraud outcome computed at ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAssessment {
    pub score: f64,
    pub band: RiskBand,
    pub level: RiskLevel,
    pub flags: Vec<String>,
    pub source: ScoreSource,
}

/// Whether the slip total agrees with its line items
///
/// None when there are no items to compare against.
pub fn total_matches_items(total: f64, items: &[ProcessedItem]) -> Option<bool> {
    if items.is_empty() {
        return None;
    }
    let sum: f64 = items.iter().map(|i| i.final_price).sum();
    Some((sum - total).abs() <= AMOUNT_TOLERANCE)
}

/// Flags derived locally from the receipt and duplicate outcome
pub fn local_flags(receipt: &ProcessedReceipt, duplicate: &DuplicateCheck) -> Vec<&'static str> {
    let mut flags = Vec::new();
    if duplicate.is_duplicate {
        flags.push(FLAG_DUPLICATE_RECEIPT);
    }
    if receipt.is_screen {
        flags.push(FLAG_SCREENSHOT);
    }
    if receipt.is_blurry {
        flags.push(FLAG_SLIGHT_BLUR);
    }
    if receipt.details.is_direct_photo == Some(false) {
        flags.push(FLAG_NOT_DIRECT_PHOTO);
    }
    if !receipt.was_defaulted(DefaultedField::Total)
        && total_matches_items(receipt.total_amount, &receipt.items) == Some(false)
    {
        flags.push(FLAG_AMOUNT_MISMATCH);
    }
    flags
}

/// Score from flags alone: independent contributions combined
pub fn local_score(flags: &[String]) -> f64 {
    let clear: f64 = flags
        .iter()
        .map(|f| 1.0 - FlagSeverity::of(f).weight())
        .product();
    (1.0 - clear).clamp(0.0, 1.0)
}

/// Assess fraud risk for a freshly mapped receipt
pub fn assess_fraud(
    receipt: &ProcessedReceipt,
    duplicate: &DuplicateCheck,
    bands: &RiskBands,
) -> FraudAssessment {
    let mut flags = receipt.details.ai_fraud_flags.clone();
    for flag in local_flags(receipt, duplicate) {
        if !flags.iter().any(|f| f == flag) {
            flags.push(flag.to_string());
        }
    }

    let (score, source) = match receipt.details.ai_fraud_score {
        Some(score) => (score, ScoreSource::Ai),
        None => (local_score(&flags), ScoreSource::Local),
    };
    let band = RiskBand::from_score(score, bands);

    FraudAssessment {
        score,
        band,
        level: band.stored_level(),
        flags,
        source,
    }
}

/// A flag with its presentation attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagView {
    pub flag: String,
    pub severity: FlagSeverity,
    pub category: FlagCategory,
}

/// Flags grouped for the fraud analysis view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FraudAnalysis {
    pub band: Option<RiskBand>,
    pub photo: Vec<FlagView>,
    pub tampering: Vec<FlagView>,
    pub consistency: Vec<FlagView>,
    pub other: Vec<FlagView>,
}

pub fn analyze_flags(score: Option<f64>, flags: &[String], bands: &RiskBands) -> FraudAnalysis {
    let mut analysis = FraudAnalysis {
        band: score.map(|s| RiskBand::from_score(s, bands)),
        ..Default::default()
    };
    for flag in flags {
        let view = FlagView {
            flag: flag.clone(),
            severity: FlagSeverity::of(flag),
            category: FlagCategory::of(flag),
        };
        match view.category {
            FlagCategory::Photo => analysis.photo.push(view),
            FlagCategory::Tampering => analysis.tampering.push(view),
            FlagCategory::Consistency => analysis.consistency.push(view),
            FlagCategory::Other => analysis.other.push(view),
        }
    }
    analysis
}
