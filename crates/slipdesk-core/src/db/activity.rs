//! Activity log operations
//!
//! Rows are only ever inserted; there is no update or delete path other than
//! the cascade from a deleted slip.

use rusqlite::params;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::events::{ChangeEvent, ChangeOp, ChangeTable};
use crate::models::*;

/// Insert inside an open transaction, returning the new row id
pub(super) fn insert_activity_tx(
    conn: &rusqlite::Connection,
    slip_id: i64,
    activity: &NewActivity,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO activity_log (slip_id, action, details, moderator_id, from_status, to_status)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            slip_id,
            activity.action.as_str(),
            activity.details,
            activity.moderator_id,
            activity.from_status.map(|s| s.as_str()),
            activity.to_status.map(|s| s.as_str()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    /// Append one activity entry
    pub fn insert_activity(&self, slip_id: i64, activity: &NewActivity) -> Result<i64> {
        let conn = self.conn()?;
        let id = insert_activity_tx(&conn, slip_id, activity)?;
        self.publish(ChangeEvent {
            table: ChangeTable::ActivityLog,
            op: ChangeOp::Insert,
            id,
            slip_id: Some(slip_id),
        });
        Ok(id)
    }

    /// Full history of one slip, oldest first
    pub fn list_activity(&self, slip_id: i64) -> Result<Vec<ActivityLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, slip_id, action, details, moderator_id, from_status, to_status, created_at
             FROM activity_log WHERE slip_id = ? ORDER BY created_at, id",
        )?;
        let entries = stmt
            .query_map([slip_id], Self::row_to_activity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Most recent entries across all slips, newest first
    pub fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityFeedItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.slip_id, a.action, a.details, a.moderator_id, a.from_status,
                    a.to_status, a.created_at, s.retailer_name, s.total_amount
             FROM activity_log a
             LEFT JOIN slips s ON s.id = a.slip_id
             ORDER BY a.created_at DESC, a.id DESC
             LIMIT ?",
        )?;
        let items = stmt
            .query_map([limit.max(0)], |row| {
                Ok(ActivityFeedItem {
                    entry: Self::row_to_activity(row)?,
                    slip_retailer: row.get(8)?,
                    slip_amount: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn row_to_activity(row: &rusqlite::Row) -> rusqlite::Result<ActivityLogEntry> {
        let action: String = row.get(2)?;
        let from_status: Option<String> = row.get(5)?;
        let to_status: Option<String> = row.get(6)?;
        let created_at: String = row.get(7)?;

        Ok(ActivityLogEntry {
            id: row.get(0)?,
            slip_id: row.get(1)?,
            action: action.parse().unwrap_or(ActivityAction::Noted),
            details: row.get(3)?,
            moderator_id: row.get(4)?,
            from_status: from_status.and_then(|s| s.parse().ok()),
            to_status: to_status.and_then(|s| s.parse().ok()),
            created_at: parse_datetime(&created_at),
        })
    }
}
