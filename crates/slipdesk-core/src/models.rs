//! Domain models for Slipdesk

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Moderation status of a slip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlipStatus {
    /// Uploaded, OCR not finished
    #[default]
    Pending,
    /// OCR finished, awaiting classification
    Processing,
    AutoApproved,
    AutoRejected,
    /// Waiting for a moderator
    ManualReview,
    Approved,
    Rejected,
    /// Approved by a moderator after editing extracted fields
    Corrected,
}

impl SlipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::AutoApproved => "auto_approved",
            Self::AutoRejected => "auto_rejected",
            Self::ManualReview => "manual_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Corrected => "corrected",
        }
    }

    /// Terminal statuses accept notes but no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved
                | Self::Rejected
                | Self::AutoApproved
                | Self::AutoRejected
                | Self::Corrected
        )
    }

    pub fn all() -> &'static [SlipStatus] {
        &[
            Self::Pending,
            Self::Processing,
            Self::AutoApproved,
            Self::AutoRejected,
            Self::ManualReview,
            Self::Approved,
            Self::Rejected,
            Self::Corrected,
        ]
    }
}

impl std::str::FromStr for SlipStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "auto_approved" => Ok(Self::AutoApproved),
            "auto_rejected" => Ok(Self::AutoRejected),
            "manual_review" => Ok(Self::ManualReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "corrected" => Ok(Self::Corrected),
            _ => Err(format!("Unknown slip status: {}", s)),
        }
    }
}

impl std::fmt::Display for SlipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The AI's suggested disposition for a slip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    AutoApprove,
    AutoReject,
    ManualReview,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoApprove => "AUTO_APPROVE",
            Self::AutoReject => "AUTO_REJECT",
            Self::ManualReview => "MANUAL_REVIEW",
        }
    }
}

impl std::str::FromStr for RecommendedAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace(['-', ' '], "_").as_str() {
            "AUTO_APPROVE" => Ok(Self::AutoApprove),
            "AUTO_REJECT" => Ok(Self::AutoReject),
            "MANUAL_REVIEW" => Ok(Self::ManualReview),
            _ => Err(format!("Unknown recommended action: {}", s)),
        }
    }
}

/// Persisted fraud risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of activity log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Approved,
    Rejected,
    Corrected,
    Escalated,
    Noted,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Corrected => "corrected",
            Self::Escalated => "escalated",
            Self::Noted => "noted",
        }
    }
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "corrected" => Ok(Self::Corrected),
            "escalated" => Ok(Self::Escalated),
            "noted" => Ok(Self::Noted),
            _ => Err(format!("Unknown activity action: {}", s)),
        }
    }
}

/// Extracted field that the mapper had to fill with a default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultedField {
    Retailer,
    Date,
    Time,
    Total,
}

impl DefaultedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retailer => "retailer",
            Self::Date => "date",
            Self::Time => "time",
            Self::Total => "total",
        }
    }
}

impl std::str::FromStr for DefaultedField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "retailer" => Ok(Self::Retailer),
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            "total" => Ok(Self::Total),
            _ => Err(format!("Unknown defaulted field: {}", s)),
        }
    }
}

/// Line item as produced by the extraction mapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_price: f64,
    pub discount: f64,
    pub final_price: f64,
}

/// Payment entry as produced by the extraction mapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedPayment {
    pub method: String,
    pub amount: f64,
}

/// Optional extraction output beyond the core fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptDetails {
    pub store_branch: Option<String>,
    pub vat_amount: Option<f64>,
    pub till_number: Option<String>,
    pub receipt_number: Option<String>,
    pub barcode_data: Option<String>,
    /// First payment method actually read off the slip
    pub payment_method: Option<String>,
    /// Overall OCR confidence in 0..1
    pub extraction_confidence: Option<f64>,
    pub ai_fraud_score: Option<f64>,
    pub ai_fraud_flags: Vec<String>,
    pub is_direct_photo: Option<bool>,
    pub recommended_action: Option<RecommendedAction>,
}

/// Flat canonical receipt derived from an OCR response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedReceipt {
    pub retailer: String,
    /// ISO date, or the raw string when it could not be parsed
    pub date: String,
    /// The date was not on the slip and was filled with today's date
    pub date_inferred: bool,
    pub time: String,
    pub total_amount: f64,
    pub items: Vec<ProcessedItem>,
    pub payments: Vec<ProcessedPayment>,
    pub is_blurry: bool,
    pub is_screen: bool,
    pub is_receipt: bool,
    pub details: ReceiptDetails,
    pub defaults_applied: Vec<DefaultedField>,
}

impl ProcessedReceipt {
    pub fn was_defaulted(&self, field: DefaultedField) -> bool {
        self.defaults_applied.contains(&field)
    }
}

/// Field-level override recorded by a moderator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCorrection {
    pub original: serde_json::Value,
    pub corrected: serde_json::Value,
}

/// Overrides applied to one line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemCorrection {
    pub id: i64,
    pub fields: BTreeMap<String, FieldCorrection>,
}

/// Structured diff of everything a moderator corrected on a slip
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectedData {
    pub fields: BTreeMap<String, FieldCorrection>,
    #[serde(rename = "lineItems", alias = "line_items", default)]
    pub line_items: Vec<LineItemCorrection>,
}

impl CorrectedData {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.line_items.iter().all(|li| li.fields.is_empty())
    }

    /// Corrected value for a slip field, if one was recorded
    pub fn corrected(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field).map(|c| &c.corrected)
    }
}

/// A till slip submitted for moderation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slip {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub image_url: String,
    pub user_id: Option<String>,
    pub status: SlipStatus,

    // Processing metadata
    pub ai_processed_at: Option<DateTime<Utc>>,
    pub ai_processing_time_ms: Option<i64>,
    pub ai_model_used: Option<String>,
    pub ai_cost_usd: Option<f64>,
    pub recommended_action: Option<RecommendedAction>,
    pub ai_response: Option<serde_json::Value>,
    pub extraction_confidence: Option<f64>,

    // Moderation
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,

    // Extracted fields
    pub retailer_name: String,
    pub store_branch: Option<String>,
    pub slip_date: String,
    pub date_inferred: bool,
    pub slip_time: String,
    pub total_amount: f64,
    pub vat_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub till_number: Option<String>,
    pub receipt_number: Option<String>,
    pub barcode_data: Option<String>,
    pub line_items_count: i64,
    pub defaults_applied: Vec<DefaultedField>,

    // Quality flags
    pub is_blurry: bool,
    pub is_screen: bool,
    pub is_receipt: bool,

    // Validation outcome (None = unknown)
    pub approved_retailer: Option<bool>,
    pub slip_within_7_days: Option<bool>,
    pub is_valid: Option<bool>,

    // Fraud outcome
    pub fraud_risk_score: Option<f64>,
    pub fraud_risk_level: Option<RiskLevel>,
    pub is_direct_photo: Option<bool>,
    pub fraud_flags: Vec<String>,

    // Corrections
    pub corrected_data: Option<CorrectedData>,
    pub was_corrected: bool,

    // Duplicate outcome
    pub fingerprint: String,
    pub is_duplicate: bool,
    pub duplicate_of: Option<i64>,
}

impl Slip {
    /// Parsed slip date, when the stored value is ISO-shaped
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.slip_date, "%Y-%m-%d").ok()
    }

    /// Current value of a correctable text field, corrections applied
    pub fn effective_text(&self, field: &str) -> Option<String> {
        if let Some(value) = self.corrected_data.as_ref().and_then(|c| c.corrected(field)) {
            return value.as_str().map(str::to_string);
        }
        match field {
            "retailer_name" => Some(self.retailer_name.clone()),
            "store_branch" => self.store_branch.clone(),
            "slip_date" => Some(self.slip_date.clone()),
            "slip_time" => Some(self.slip_time.clone()),
            "payment_method" => self.payment_method.clone(),
            "till_number" => self.till_number.clone(),
            "receipt_number" => self.receipt_number.clone(),
            _ => None,
        }
    }

    /// Total amount with any moderator correction applied
    pub fn effective_total(&self) -> f64 {
        self.corrected_data
            .as_ref()
            .and_then(|c| c.corrected("total_amount"))
            .and_then(|v| v.as_f64())
            .unwrap_or(self.total_amount)
    }

    pub fn is_field_corrected(&self, field: &str) -> bool {
        self.corrected_data
            .as_ref()
            .is_some_and(|c| c.fields.contains_key(field))
    }
}

/// Fields needed to insert a slip
#[derive(Debug, Clone)]
pub struct NewSlip {
    pub image_url: String,
    pub user_id: Option<String>,
    pub status: SlipStatus,
    pub ai_processing_time_ms: Option<i64>,
    pub ai_model_used: Option<String>,
    pub ai_cost_usd: Option<f64>,
    pub ai_response: Option<serde_json::Value>,
    pub receipt: ProcessedReceipt,
    pub approved_retailer: Option<bool>,
    pub slip_within_7_days: Option<bool>,
    pub is_valid: Option<bool>,
    pub fraud_risk_score: Option<f64>,
    pub fraud_risk_level: Option<RiskLevel>,
    pub fraud_flags: Vec<String>,
    pub fingerprint: String,
    pub is_duplicate: bool,
    pub duplicate_of: Option<i64>,
}

/// Persisted line item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub slip_id: i64,
    pub line_number: i64,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_price: f64,
    pub discount: f64,
    pub final_price: f64,
    pub corrected_description: Option<String>,
    pub corrected_quantity: Option<f64>,
    pub corrected_unit_price: Option<f64>,
    pub corrected_total_price: Option<f64>,
    pub is_corrected: bool,
}

/// Persisted payment entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub id: i64,
    pub slip_id: i64,
    pub method: String,
    pub amount: f64,
}

/// A slip with its owned children
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlipDetail {
    #[serde(flatten)]
    pub slip: Slip,
    pub line_items: Vec<LineItem>,
    pub payments: Vec<PaymentEntry>,
}

/// Immutable audit trail entry for a slip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub slip_id: i64,
    pub action: ActivityAction,
    pub details: Option<String>,
    /// None for system decisions
    pub moderator_id: Option<String>,
    pub from_status: Option<SlipStatus>,
    pub to_status: Option<SlipStatus>,
    pub created_at: DateTime<Utc>,
}

impl ActivityLogEntry {
    pub fn actor(&self) -> &str {
        self.moderator_id.as_deref().unwrap_or("System")
    }
}

/// Activity entry with the slip it refers to, for feeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityFeedItem {
    #[serde(flatten)]
    pub entry: ActivityLogEntry,
    pub slip_retailer: Option<String>,
    pub slip_amount: Option<f64>,
}

/// Activity entry about to be appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivity {
    pub action: ActivityAction,
    pub details: Option<String>,
    pub moderator_id: Option<String>,
    pub from_status: Option<SlipStatus>,
    pub to_status: Option<SlipStatus>,
}

/// Filters for the moderation queue listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlipFilter {
    pub status: Option<SlipStatus>,
    pub risk_level: Option<RiskLevel>,
    /// Substring match against the retailer name
    pub retailer: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub duplicates_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Payment entry in the exported receipt contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedPayment {
    pub method: String,
    pub amount: f64,
}

/// Line item in the exported receipt contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedLineItem {
    pub description: String,
    pub qty: f64,
    pub unit_price: f64,
    pub discount: f64,
    pub total_price: f64,
    pub final_line_total: f64,
}

/// Stable external JSON shape of a processed receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedReceipt {
    pub retailer_name: String,
    /// MM/DD/YYYY
    pub date: String,
    pub time: String,
    pub is_blurry: bool,
    pub is_screen: bool,
    pub is_receipt: bool,
    pub slip_total: f64,
    pub payment_methods: Vec<ExportedPayment>,
    pub image_url: String,
    pub is_duplicate: bool,
    pub product_line_items: Vec<ExportedLineItem>,
}
