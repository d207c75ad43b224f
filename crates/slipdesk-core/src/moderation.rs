//! Moderation state machine
//!
//! ```text
//! pending -> processing -> { auto_approved | auto_rejected | manual_review }
//! non-terminal --moderator--> { approved | rejected | corrected | manual_review }
//! any --note--> (unchanged)
//! ```
//!
//! Transitions are computed here and never persisted here; the caller writes
//! the new status and the activity entry together.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{
    ActivityAction, CorrectedData, FieldCorrection, LineItemCorrection, NewActivity,
    RecommendedAction, SlipDetail, SlipStatus,
};
use crate::normalize::{is_iso_date, normalize_date, normalize_retailer};

/// Canonical reasons offered when rejecting a slip
pub const REJECTION_REASONS: &[&str] = &[
    "Not a valid receipt",
    "Duplicate submission",
    "Expired (older than 7 days)",
    "Unapproved retailer",
    "Insufficient data / unreadable",
    "Fraudulent / tampered",
    "Other",
];

/// Slip fields a moderator may correct
pub const CORRECTABLE_FIELDS: &[&str] = &[
    "retailer_name",
    "store_branch",
    "slip_date",
    "slip_time",
    "total_amount",
    "vat_amount",
    "payment_method",
    "till_number",
    "receipt_number",
];

/// Line item fields a moderator may correct
pub const CORRECTABLE_ITEM_FIELDS: &[&str] = &["description", "quantity", "unit_price", "total_price"];

const NUMERIC_FIELDS: &[&str] = &[
    "total_amount",
    "vat_amount",
    "quantity",
    "unit_price",
    "total_price",
];

pub const ESCALATION_PREFIX: &str = "ESCALATED: ";

/// Transitions driven by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    OcrCompleted,
    Classified {
        recommendation: Option<RecommendedAction>,
        has_flags: bool,
    },
}

/// Field values a moderator wants to change, before diffing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corrections {
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default, alias = "lineItems")]
    pub line_items: Vec<ItemCorrections>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCorrections {
    pub id: i64,
    pub fields: BTreeMap<String, Value>,
}

/// A moderator action on one slip
#[derive(Debug, Clone, PartialEq)]
pub enum ModeratorAction {
    Approve,
    Reject { reason: String },
    /// Approve after editing extracted fields
    Correct { corrections: CorrectedData },
    Escalate { note: String },
    AddNote { note: String },
}

impl ModeratorAction {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject { .. } => "reject",
            Self::Correct { .. } => "correct",
            Self::Escalate { .. } => "escalate",
            Self::AddNote { .. } => "add a note to",
        }
    }
}

/// Computed outcome of an action
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: SlipStatus,
    pub to: SlipStatus,
    /// None for silent transitions (pending -> processing)
    pub activity: Option<NewActivity>,
    /// Replacement review notes; None leaves them unchanged
    pub review_notes: Option<String>,
    pub corrected_data: Option<CorrectedData>,
}

impl Transition {
    pub fn changes_status(&self) -> bool {
        self.from != self.to
    }
}

/// Status the pipeline assigns after classification
pub fn initial_status(recommendation: Option<RecommendedAction>, has_flags: bool) -> SlipStatus {
    match recommendation {
        Some(RecommendedAction::AutoApprove) if !has_flags => SlipStatus::AutoApproved,
        Some(RecommendedAction::AutoReject) => SlipStatus::AutoRejected,
        _ => SlipStatus::ManualReview,
    }
}

/// Apply a pipeline event
pub fn system_transition(current: SlipStatus, event: SystemEvent) -> Result<Transition> {
    match (current, event) {
        (SlipStatus::Pending, SystemEvent::OcrCompleted) => Ok(Transition {
            from: current,
            to: SlipStatus::Processing,
            activity: None,
            review_notes: None,
            corrected_data: None,
        }),
        (
            SlipStatus::Processing,
            SystemEvent::Classified {
                recommendation,
                has_flags,
            },
        ) => {
            let to = initial_status(recommendation, has_flags);
            let action = match to {
                SlipStatus::AutoApproved => ActivityAction::Approved,
                SlipStatus::AutoRejected => ActivityAction::Rejected,
                _ => ActivityAction::Escalated,
            };
            let details = match recommendation {
                Some(r) if has_flags => format!("AI recommendation {} with fraud flags", r.as_str()),
                Some(r) => format!("AI recommendation {}", r.as_str()),
                None => "No AI recommendation".to_string(),
            };
            Ok(Transition {
                from: current,
                to,
                activity: Some(NewActivity {
                    action,
                    details: Some(details),
                    moderator_id: None,
                    from_status: Some(current),
                    to_status: Some(to),
                }),
                review_notes: None,
                corrected_data: None,
            })
        }
        (from, SystemEvent::OcrCompleted) => Err(Error::InvalidTransition {
            from: from.to_string(),
            action: "start processing".into(),
        }),
        (from, SystemEvent::Classified { .. }) => Err(Error::InvalidTransition {
            from: from.to_string(),
            action: "classify".into(),
        }),
    }
}

fn required_text(value: &str, what: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidData(format!("{} is required", what)));
    }
    Ok(value.to_string())
}

/// Apply a moderator action
pub fn moderator_transition(
    current: SlipStatus,
    action: &ModeratorAction,
    moderator_id: &str,
) -> Result<Transition> {
    if current.is_terminal() && !matches!(action, ModeratorAction::AddNote { .. }) {
        return Err(Error::InvalidTransition {
            from: current.to_string(),
            action: action.verb().into(),
        });
    }

    let (to, activity_action, details, review_notes, corrected_data) = match action {
        ModeratorAction::Approve => (
            SlipStatus::Approved,
            ActivityAction::Approved,
            None,
            None,
            None,
        ),
        ModeratorAction::Reject { reason } => {
            let reason = required_text(reason, "Rejection reason")?;
            (
                SlipStatus::Rejected,
                ActivityAction::Rejected,
                Some(format!("Rejected: {}", reason)),
                Some(reason),
                None,
            )
        }
        ModeratorAction::Correct { corrections } => {
            if corrections.is_empty() {
                return Err(Error::InvalidData("No fields were changed".into()));
            }
            (
                SlipStatus::Corrected,
                ActivityAction::Corrected,
                Some(describe_corrections(corrections)),
                None,
                Some(corrections.clone()),
            )
        }
        ModeratorAction::Escalate { note } => {
            let note = required_text(note, "Escalation note")?;
            (
                SlipStatus::ManualReview,
                ActivityAction::Escalated,
                Some(note.clone()),
                Some(format!("{}{}", ESCALATION_PREFIX, note)),
                None,
            )
        }
        ModeratorAction::AddNote { note } => {
            let note = required_text(note, "Note")?;
            (current, ActivityAction::Noted, Some(note), None, None)
        }
    };

    Ok(Transition {
        from: current,
        to,
        activity: Some(NewActivity {
            action: activity_action,
            details,
            moderator_id: Some(moderator_id.to_string()),
            from_status: Some(current),
            to_status: Some(to),
        }),
        review_notes,
        corrected_data,
    })
}

/// Optimistic concurrency guard for moderator writes
pub fn check_expected_status(current: SlipStatus, expected: Option<SlipStatus>) -> Result<()> {
    match expected {
        Some(expected) if expected != current => Err(Error::Conflict(format!(
            "Slip is '{}' but the action expected '{}'",
            current, expected
        ))),
        _ => Ok(()),
    }
}

fn describe_corrections(corrections: &CorrectedData) -> String {
    let mut names: Vec<String> = corrections.fields.keys().cloned().collect();
    for item in &corrections.line_items {
        names.extend(item.fields.keys().map(|f| format!("item {}.{}", item.id, f)));
    }
    format!("Corrected {} field(s): {}", names.len(), names.join(", "))
}

/// Normalize one corrected value and check it has the right shape
fn clean_value(field: &str, value: &Value) -> Result<Value> {
    if NUMERIC_FIELDS.contains(&field) {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
            _ => None,
        }
        .filter(|n| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| {
            Error::InvalidData(format!("{} must be a non-negative number", field))
        })?;
        return Ok(serde_json::json!(number));
    }

    let text = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| Error::InvalidData(format!("{} must be a string", field)))?;

    if field == "slip_date" {
        let date = normalize_date(text)
            .filter(|d| is_iso_date(d))
            .ok_or_else(|| Error::InvalidData(format!("Unrecognised date: {}", text)))?;
        return Ok(Value::String(date));
    }
    if field == "retailer_name" {
        if text.is_empty() {
            return Err(Error::InvalidData("retailer_name cannot be empty".into()));
        }
        return Ok(Value::String(normalize_retailer(text)));
    }
    Ok(Value::String(text.to_string()))
}

fn slip_field_value(detail: &SlipDetail, field: &str) -> Value {
    let slip = &detail.slip;
    match field {
        "retailer_name" => Value::from(slip.retailer_name.clone()),
        "store_branch" => Value::from(slip.store_branch.clone()),
        "slip_date" => Value::from(slip.slip_date.clone()),
        "slip_time" => Value::from(slip.slip_time.clone()),
        "total_amount" => Value::from(slip.total_amount),
        "vat_amount" => Value::from(slip.vat_amount),
        "payment_method" => Value::from(slip.payment_method.clone()),
        "till_number" => Value::from(slip.till_number.clone()),
        "receipt_number" => Value::from(slip.receipt_number.clone()),
        _ => Value::Null,
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < 1e-9,
        _ => a == b,
    }
}

/// Diff requested corrections against the stored slip
///
/// Unknown fields and item ids are rejected; values equal to the original
/// are dropped. The result may be empty.
pub fn build_corrected_data(detail: &SlipDetail, corrections: &Corrections) -> Result<CorrectedData> {
    let mut data = CorrectedData::default();

    for (field, value) in &corrections.fields {
        if !CORRECTABLE_FIELDS.contains(&field.as_str()) {
            return Err(Error::InvalidData(format!("Field '{}' cannot be corrected", field)));
        }
        let corrected = clean_value(field, value)?;
        let original = slip_field_value(detail, field);
        if !same_value(&original, &corrected) {
            data.fields.insert(
                field.clone(),
                FieldCorrection {
                    original,
                    corrected,
                },
            );
        }
    }

    for item in &corrections.line_items {
        let stored = detail
            .line_items
            .iter()
            .find(|li| li.id == item.id)
            .ok_or_else(|| Error::InvalidData(format!("Line item {} is not on this slip", item.id)))?;

        let mut fields = BTreeMap::new();
        for (field, value) in &item.fields {
            let original = match field.as_str() {
                "description" => Value::from(stored.description.clone()),
                "quantity" => Value::from(stored.quantity),
                "unit_price" => Value::from(stored.unit_price),
                "total_price" => Value::from(stored.total_price),
                other => {
                    return Err(Error::InvalidData(format!(
                        "Line item field '{}' cannot be corrected",
                        other
                    )))
                }
            };
            let corrected = clean_value(field, value)?;
            if !same_value(&original, &corrected) {
                fields.insert(
                    field.clone(),
                    FieldCorrection {
                        original,
                        corrected,
                    },
                );
            }
        }
        if !fields.is_empty() {
            data.line_items.push(LineItemCorrection {
                id: item.id,
                fields,
            });
        }
    }

    Ok(data)
}
