//! Slip, line item and payment operations

use chrono::Utc;
use rusqlite::{params, ErrorCode, OptionalExtension, Transaction as SqlTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::slip_filter::SlipQuery;
use super::{activity, format_datetime, parse_datetime, Database};
use crate::duplicate::{Fingerprint, FingerprintLookup};
use crate::error::{Error, Result};
use crate::events::{ChangeEvent, ChangeOp, ChangeTable};
use crate::models::*;
use crate::moderation::Transition;
use crate::scoring::ValidationReport;

pub(crate) const SLIP_COLUMNS: &str = "s.id, s.created_at, s.image_url, s.user_id, s.status,
    s.ai_processed_at, s.ai_processing_time_ms, s.ai_model_used, s.ai_cost_usd,
    s.recommended_action, s.ai_response, s.extraction_confidence,
    s.reviewed_by, s.reviewed_at, s.review_notes,
    s.retailer_name, s.store_branch, s.slip_date, s.date_inferred, s.slip_time,
    s.total_amount, s.vat_amount, s.payment_method, s.till_number, s.receipt_number,
    s.barcode_data, s.line_items_count, s.defaults_applied,
    s.is_blurry, s.is_screen, s.is_receipt,
    s.approved_retailer, s.slip_within_7_days, s.is_valid,
    s.fraud_risk_score, s.fraud_risk_level, s.is_direct_photo, s.fraud_flags,
    s.corrected_data, s.was_corrected,
    s.fingerprint, s.is_duplicate, s.duplicate_of";

const INSERT_COLUMNS: &[&str] = &[
    "image_url",
    "user_id",
    "status",
    "ai_processed_at",
    "ai_processing_time_ms",
    "ai_model_used",
    "ai_cost_usd",
    "recommended_action",
    "ai_response",
    "extraction_confidence",
    "retailer_name",
    "store_branch",
    "slip_date",
    "date_inferred",
    "slip_time",
    "total_amount",
    "vat_amount",
    "payment_method",
    "till_number",
    "receipt_number",
    "barcode_data",
    "line_items_count",
    "payments_count",
    "defaults_applied",
    "is_blurry",
    "is_screen",
    "is_receipt",
    "approved_retailer",
    "slip_within_7_days",
    "is_valid",
    "fraud_risk_score",
    "fraud_risk_level",
    "is_direct_photo",
    "fraud_flags",
    "fingerprint",
    "is_duplicate",
    "duplicate_of",
];

/// Slip whose stored line items or payments disagree with the extracted counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteSlip {
    pub slip_id: i64,
    pub expected_items: i64,
    pub stored_items: i64,
    pub expected_payments: i64,
    pub stored_payments: i64,
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl Database {
    /// Insert the primary slip row
    ///
    /// A second original with the same fingerprint violates the partial
    /// unique index and comes back as [`Error::Conflict`].
    pub fn insert_slip(&self, slip: &NewSlip) -> Result<i64> {
        let conn = self.conn()?;
        let r = &slip.receipt;
        let d = &r.details;

        let sql = format!(
            "INSERT INTO slips ({}) VALUES ({})",
            INSERT_COLUMNS.join(", "),
            vec!["?"; INSERT_COLUMNS.len()].join(", ")
        );
        let processed_at = slip
            .ai_response
            .as_ref()
            .map(|_| format_datetime(Utc::now()));
        let ai_response = slip
            .ai_response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let inserted = conn.execute(
            &sql,
            params![
                slip.image_url,
                slip.user_id,
                slip.status.as_str(),
                processed_at,
                slip.ai_processing_time_ms,
                slip.ai_model_used,
                slip.ai_cost_usd,
                d.recommended_action.map(|a| a.as_str()),
                ai_response,
                d.extraction_confidence,
                r.retailer,
                d.store_branch,
                r.date,
                r.date_inferred,
                r.time,
                r.total_amount,
                d.vat_amount,
                d.payment_method,
                d.till_number,
                d.receipt_number,
                d.barcode_data,
                r.items.len() as i64,
                r.payments.len() as i64,
                serde_json::to_string(&r.defaults_applied)?,
                r.is_blurry,
                r.is_screen,
                r.is_receipt,
                slip.approved_retailer,
                slip.slip_within_7_days,
                slip.is_valid,
                slip.fraud_risk_score,
                slip.fraud_risk_level.map(|l| l.as_str()),
                d.is_direct_photo,
                serde_json::to_string(&slip.fraud_flags)?,
                slip.fingerprint,
                slip.is_duplicate,
                slip.duplicate_of,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::Conflict(format!(
                    "An original slip with fingerprint {} already exists",
                    slip.fingerprint
                )))
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        debug!(slip_id = id, status = %slip.status, "Inserted slip");
        self.publish(ChangeEvent {
            table: ChangeTable::Slips,
            op: ChangeOp::Insert,
            id,
            slip_id: Some(id),
        });
        Ok(id)
    }

    /// Insert a slip's line items in one transaction
    pub fn insert_line_items(&self, slip_id: i64, items: &[ProcessedItem]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(items.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO slip_line_items (slip_id, line_number, description, quantity,
                 unit_price, total_price, discount, final_price)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for (i, item) in items.iter().enumerate() {
                stmt.execute(params![
                    slip_id,
                    i as i64 + 1,
                    item.description,
                    item.quantity,
                    item.unit_price,
                    item.total_price,
                    item.discount,
                    item.final_price,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;

        for id in &ids {
            self.publish(ChangeEvent {
                table: ChangeTable::SlipLineItems,
                op: ChangeOp::Insert,
                id: *id,
                slip_id: Some(slip_id),
            });
        }
        Ok(ids.len())
    }

    /// Insert a slip's payment entries in one transaction
    pub fn insert_payments(&self, slip_id: i64, payments: &[ProcessedPayment]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(payments.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO slip_payments (slip_id, method, amount) VALUES (?, ?, ?)",
            )?;
            for payment in payments {
                stmt.execute(params![slip_id, payment.method, payment.amount])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;

        for id in &ids {
            self.publish(ChangeEvent {
                table: ChangeTable::SlipPayments,
                op: ChangeOp::Insert,
                id: *id,
                slip_id: Some(slip_id),
            });
        }
        Ok(ids.len())
    }

    pub fn get_slip(&self, id: i64) -> Result<Option<Slip>> {
        let conn = self.conn()?;
        let slip = conn
            .query_row(
                &format!("SELECT {} FROM slips s WHERE s.id = ?", SLIP_COLUMNS),
                [id],
                Self::row_to_slip,
            )
            .optional()?;
        Ok(slip)
    }

    /// Slip with its line items and payments
    pub fn get_slip_detail(&self, id: i64) -> Result<Option<SlipDetail>> {
        let Some(slip) = self.get_slip(id)? else {
            return Ok(None);
        };
        Ok(Some(SlipDetail {
            line_items: self.get_line_items(id)?,
            payments: self.get_payments(id)?,
            slip,
        }))
    }

    pub fn get_line_items(&self, slip_id: i64) -> Result<Vec<LineItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, slip_id, line_number, description, quantity, unit_price, total_price,
                    discount, final_price, corrected_description, corrected_quantity,
                    corrected_unit_price, corrected_total_price, is_corrected
             FROM slip_line_items WHERE slip_id = ? ORDER BY line_number, id",
        )?;
        let items = stmt
            .query_map([slip_id], |row| {
                Ok(LineItem {
                    id: row.get(0)?,
                    slip_id: row.get(1)?,
                    line_number: row.get(2)?,
                    description: row.get(3)?,
                    quantity: row.get(4)?,
                    unit_price: row.get(5)?,
                    total_price: row.get(6)?,
                    discount: row.get(7)?,
                    final_price: row.get(8)?,
                    corrected_description: row.get(9)?,
                    corrected_quantity: row.get(10)?,
                    corrected_unit_price: row.get(11)?,
                    corrected_total_price: row.get(12)?,
                    is_corrected: row.get(13)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn get_payments(&self, slip_id: i64) -> Result<Vec<PaymentEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, slip_id, method, amount FROM slip_payments WHERE slip_id = ? ORDER BY id",
        )?;
        let payments = stmt
            .query_map([slip_id], |row| {
                Ok(PaymentEntry {
                    id: row.get(0)?,
                    slip_id: row.get(1)?,
                    method: row.get(2)?,
                    amount: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(payments)
    }

    /// Queue listing, newest first
    pub fn list_slips(&self, filter: &SlipFilter) -> Result<Vec<Slip>> {
        let conn = self.conn()?;
        let query = SlipQuery::new(filter);
        let (limit, offset) = query.page();
        let built = query.build();

        let sql = format!(
            "SELECT {} FROM slips s {} ORDER BY s.created_at DESC, s.id DESC LIMIT ? OFFSET ?",
            SLIP_COLUMNS, built.where_clause
        );
        let mut params = built.into_params();
        params.push(Box::new(limit));
        params.push(Box::new(offset));
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let slips = stmt
            .query_map(params_refs.as_slice(), Self::row_to_slip)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(slips)
    }

    pub fn count_slips(&self, filter: &SlipFilter) -> Result<i64> {
        let conn = self.conn()?;
        let built = SlipQuery::new(filter).build();
        let count = conn.query_row(
            &built.build_count_query(),
            built.params_refs().as_slice(),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Moderator delete; children and activity cascade
    pub fn delete_slip(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM slips WHERE id = ?", [id])?;
        if deleted > 0 {
            info!(slip_id = id, "Deleted slip");
            self.publish(ChangeEvent {
                table: ChangeTable::Slips,
                op: ChangeOp::Delete,
                id,
                slip_id: Some(id),
            });
        }
        Ok(deleted > 0)
    }

    /// Id of the earliest stored slip with this fingerprint
    ///
    /// The original wins when it still exists; once it has been deleted the
    /// oldest surviving duplicate stands in for it.
    pub fn find_prior_by_fingerprint(&self, fingerprint: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM slips WHERE fingerprint = ?
                 ORDER BY is_duplicate, id LIMIT 1",
                [fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Write a computed transition and its activity entry atomically
    ///
    /// Fails with [`Error::Conflict`] when the slip is no longer in
    /// `transition.from`.
    pub fn apply_transition(
        &self,
        slip_id: i64,
        transition: &Transition,
        validation: Option<&ValidationReport>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current: String = tx
            .query_row("SELECT status FROM slips WHERE id = ?", [slip_id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("Slip {}", slip_id)))?;
        if current != transition.from.as_str() {
            return Err(Error::Conflict(format!(
                "Slip {} moved from '{}' to '{}' before the action was saved",
                slip_id, transition.from, current
            )));
        }

        tx.execute(
            "UPDATE slips SET status = ?, review_notes = COALESCE(?, review_notes) WHERE id = ?",
            params![transition.to.as_str(), transition.review_notes, slip_id],
        )?;

        let reviewer = transition
            .activity
            .as_ref()
            .filter(|a| a.action != ActivityAction::Noted)
            .and_then(|a| a.moderator_id.as_deref());
        if let Some(reviewer) = reviewer {
            tx.execute(
                "UPDATE slips SET reviewed_by = ?, reviewed_at = ? WHERE id = ?",
                params![reviewer, format_datetime(Utc::now()), slip_id],
            )?;
        }

        let mut corrected_items = Vec::new();
        if let Some(data) = &transition.corrected_data {
            tx.execute(
                "UPDATE slips SET corrected_data = ?, was_corrected = 1 WHERE id = ?",
                params![serde_json::to_string(data)?, slip_id],
            )?;
            for item in &data.line_items {
                Self::write_item_correction(&tx, slip_id, item)?;
                corrected_items.push(item.id);
            }
        }

        if let Some(report) = validation {
            tx.execute(
                "UPDATE slips SET approved_retailer = ?, slip_within_7_days = ?, is_valid = ?
                 WHERE id = ?",
                params![
                    report.approved_retailer.as_option(),
                    report.within_freshness_window.as_option(),
                    report.overall.as_option(),
                    slip_id
                ],
            )?;
        }

        let activity_id = match &transition.activity {
            Some(activity) => Some(activity::insert_activity_tx(&tx, slip_id, activity)?),
            None => None,
        };
        tx.commit()?;

        info!(
            slip_id,
            from = %transition.from,
            to = %transition.to,
            "Applied slip transition"
        );
        self.publish(ChangeEvent {
            table: ChangeTable::Slips,
            op: ChangeOp::Update,
            id: slip_id,
            slip_id: Some(slip_id),
        });
        for id in corrected_items {
            self.publish(ChangeEvent {
                table: ChangeTable::SlipLineItems,
                op: ChangeOp::Update,
                id,
                slip_id: Some(slip_id),
            });
        }
        if let Some(id) = activity_id {
            self.publish(ChangeEvent {
                table: ChangeTable::ActivityLog,
                op: ChangeOp::Insert,
                id,
                slip_id: Some(slip_id),
            });
        }
        Ok(())
    }

    fn write_item_correction(
        tx: &SqlTransaction<'_>,
        slip_id: i64,
        item: &LineItemCorrection,
    ) -> Result<()> {
        let text = |field: &str| {
            item.fields
                .get(field)
                .and_then(|c| c.corrected.as_str().map(str::to_string))
        };
        let number = |field: &str| item.fields.get(field).and_then(|c| c.corrected.as_f64());

        let updated = tx.execute(
            "UPDATE slip_line_items SET
                corrected_description = COALESCE(?, corrected_description),
                corrected_quantity = COALESCE(?, corrected_quantity),
                corrected_unit_price = COALESCE(?, corrected_unit_price),
                corrected_total_price = COALESCE(?, corrected_total_price),
                is_corrected = 1
             WHERE id = ? AND slip_id = ?",
            params![
                text("description"),
                number("quantity"),
                number("unit_price"),
                number("total_price"),
                item.id,
                slip_id
            ],
        )?;
        if updated == 0 {
            return Err(Error::InvalidData(format!(
                "Line item {} is not on slip {}",
                item.id, slip_id
            )));
        }
        Ok(())
    }

    /// Stored (line item, payment) row counts for a slip
    pub fn child_counts(&self, slip_id: i64) -> Result<(i64, i64)> {
        let conn = self.conn()?;
        let counts = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM slip_line_items WHERE slip_id = ?1),
                (SELECT COUNT(*) FROM slip_payments WHERE slip_id = ?1)",
            [slip_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    /// Slips whose child rows do not match `line_items_count` or `payments_count`
    pub fn find_incomplete_slips(&self) -> Result<Vec<IncompleteSlip>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, expected_items, stored_items, expected_payments, stored_payments FROM (
                SELECT s.id AS id,
                       s.line_items_count AS expected_items,
                       (SELECT COUNT(*) FROM slip_line_items li WHERE li.slip_id = s.id) AS stored_items,
                       s.payments_count AS expected_payments,
                       (SELECT COUNT(*) FROM slip_payments p WHERE p.slip_id = s.id) AS stored_payments
                FROM slips s
             ) WHERE stored_items != expected_items OR stored_payments != expected_payments
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(IncompleteSlip {
                    slip_id: row.get(0)?,
                    expected_items: row.get(1)?,
                    stored_items: row.get(2)?,
                    expected_payments: row.get(3)?,
                    stored_payments: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub(crate) fn row_to_slip(row: &rusqlite::Row) -> rusqlite::Result<Slip> {
        let created_at: String = row.get("created_at")?;
        let status: String = row.get("status")?;
        let ai_processed_at: Option<String> = row.get("ai_processed_at")?;
        let reviewed_at: Option<String> = row.get("reviewed_at")?;
        let recommended_action: Option<String> = row.get("recommended_action")?;
        let ai_response: Option<String> = row.get("ai_response")?;
        let defaults_applied: String = row.get("defaults_applied")?;
        let fraud_risk_level: Option<String> = row.get("fraud_risk_level")?;
        let fraud_flags: String = row.get("fraud_flags")?;
        let corrected_data: Option<String> = row.get("corrected_data")?;

        Ok(Slip {
            id: row.get("id")?,
            created_at: parse_datetime(&created_at),
            image_url: row.get("image_url")?,
            user_id: row.get("user_id")?,
            status: status.parse().unwrap_or_default(),
            ai_processed_at: ai_processed_at.map(|s| parse_datetime(&s)),
            ai_processing_time_ms: row.get("ai_processing_time_ms")?,
            ai_model_used: row.get("ai_model_used")?,
            ai_cost_usd: row.get("ai_cost_usd")?,
            recommended_action: recommended_action.and_then(|s| s.parse().ok()),
            ai_response: ai_response.and_then(|s| serde_json::from_str(&s).ok()),
            extraction_confidence: row.get("extraction_confidence")?,
            reviewed_by: row.get("reviewed_by")?,
            reviewed_at: reviewed_at.map(|s| parse_datetime(&s)),
            review_notes: row.get("review_notes")?,
            retailer_name: row.get("retailer_name")?,
            store_branch: row.get("store_branch")?,
            slip_date: row.get("slip_date")?,
            date_inferred: row.get("date_inferred")?,
            slip_time: row.get("slip_time")?,
            total_amount: row.get("total_amount")?,
            vat_amount: row.get("vat_amount")?,
            payment_method: row.get("payment_method")?,
            till_number: row.get("till_number")?,
            receipt_number: row.get("receipt_number")?,
            barcode_data: row.get("barcode_data")?,
            line_items_count: row.get("line_items_count")?,
            defaults_applied: serde_json::from_str(&defaults_applied).unwrap_or_default(),
            is_blurry: row.get("is_blurry")?,
            is_screen: row.get("is_screen")?,
            is_receipt: row.get("is_receipt")?,
            approved_retailer: row.get("approved_retailer")?,
            slip_within_7_days: row.get("slip_within_7_days")?,
            is_valid: row.get("is_valid")?,
            fraud_risk_score: row.get("fraud_risk_score")?,
            fraud_risk_level: fraud_risk_level.and_then(|s| s.parse().ok()),
            is_direct_photo: row.get("is_direct_photo")?,
            fraud_flags: serde_json::from_str(&fraud_flags).unwrap_or_default(),
            corrected_data: corrected_data.and_then(|s| serde_json::from_str(&s).ok()),
            was_corrected: row.get("was_corrected")?,
            fingerprint: row.get("fingerprint")?,
            is_duplicate: row.get("is_duplicate")?,
            duplicate_of: row.get("duplicate_of")?,
        })
    }
}

impl FingerprintLookup for Database {
    fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<i64>> {
        self.find_prior_by_fingerprint(fingerprint.as_str())
    }
}
