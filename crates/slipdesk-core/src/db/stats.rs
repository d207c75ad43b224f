//! Dashboard aggregate queries

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{parse_datetime, Database};
use crate::config::CostConfig;
use crate::error::Result;
use crate::mapper::round_cents;
use crate::models::*;

/// Days of history shown in the volume and cost series (plus today)
pub const HISTORY_DAYS: i64 = 30;
const TOP_RETAILERS: i64 = 10;
const RECENT_ACTIVITY: i64 = 20;
const FLAGGED_SLIPS: i64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlineCounts {
    pub today_slips: i64,
    pub yesterday_slips: i64,
    pub auto_approved_today: i64,
    /// Slips in manual_review, any day
    pub pending_review: i64,
    /// Slips created today with a HIGH risk level
    pub fraud_today: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePoint {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    pub count: i64,
}

/// AI cost for one day, in the display currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostDataPoint {
    pub date: NaiveDate,
    pub daily_cost: f64,
    pub cumulative: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedSlip {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub retailer_name: String,
    pub total_amount: f64,
    pub fraud_risk_score: Option<f64>,
    pub fraud_flags: Vec<String>,
    pub status: SlipStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub today: NaiveDate,
    pub counts: HeadlineCounts,
    pub volume: Vec<VolumePoint>,
    /// Sorted by count, largest first
    pub status_breakdown: Vec<NamedCount>,
    pub top_retailers: Vec<NamedCount>,
    pub cost: Vec<CostDataPoint>,
    pub month_to_date_cost: f64,
    pub currency: String,
    pub recent_activity: Vec<ActivityFeedItem>,
    pub flagged: Vec<FlaggedSlip>,
}

impl Database {
    /// Every dashboard aggregate as of `today` (UTC dates)
    pub fn dashboard_stats(&self, today: NaiveDate, cost: &CostConfig) -> Result<DashboardStats> {
        Ok(DashboardStats {
            today,
            counts: self.headline_counts(today)?,
            volume: self.volume_series(today)?,
            status_breakdown: self.status_breakdown()?,
            top_retailers: self.top_retailers(TOP_RETAILERS)?,
            cost: self.cost_series(today, cost)?,
            month_to_date_cost: self.month_to_date_cost(today, cost)?,
            currency: cost.display_currency.clone(),
            recent_activity: self.recent_activity(RECENT_ACTIVITY)?,
            flagged: self.flagged_slips(FLAGGED_SLIPS)?,
        })
    }

    pub fn headline_counts(&self, today: NaiveDate) -> Result<HeadlineCounts> {
        let conn = self.conn()?;
        let yesterday = today - chrono::Duration::days(1);
        let counts = conn.query_row(
            "SELECT
                COALESCE(SUM(date(created_at) = ?1), 0),
                COALESCE(SUM(date(created_at) = ?2), 0),
                COALESCE(SUM(date(created_at) = ?1 AND status = 'auto_approved'), 0),
                COALESCE(SUM(status = 'manual_review'), 0),
                COALESCE(SUM(date(created_at) = ?1 AND fraud_risk_level = 'HIGH'), 0)
             FROM slips",
            params![today.to_string(), yesterday.to_string()],
            |row| {
                Ok(HeadlineCounts {
                    today_slips: row.get(0)?,
                    yesterday_slips: row.get(1)?,
                    auto_approved_today: row.get(2)?,
                    pending_review: row.get(3)?,
                    fraud_today: row.get(4)?,
                })
            },
        )?;
        Ok(counts)
    }

    /// Slips per creation day, every day of the window filled in
    pub fn volume_series(&self, today: NaiveDate) -> Result<Vec<VolumePoint>> {
        let start = today - chrono::Duration::days(HISTORY_DAYS);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date(created_at) AS day, COUNT(*) FROM slips
             WHERE date(created_at) >= ? AND date(created_at) <= ?
             GROUP BY day",
        )?;
        let counts: HashMap<String, i64> = stmt
            .query_map(params![start.to_string(), today.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        Ok(start
            .iter_days()
            .take_while(|d| *d <= today)
            .map(|date| VolumePoint {
                date,
                count: counts.get(&date.to_string()).copied().unwrap_or(0),
            })
            .collect())
    }

    pub fn status_breakdown(&self) -> Result<Vec<NamedCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) AS n FROM slips GROUP BY status ORDER BY n DESC, status",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(NamedCount {
                    name: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn top_retailers(&self, limit: i64) -> Result<Vec<NamedCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT retailer_name, COUNT(*) AS n FROM slips
             WHERE retailer_name != ''
             GROUP BY retailer_name ORDER BY n DESC, retailer_name LIMIT ?",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok(NamedCount {
                    name: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Daily and cumulative AI cost in the display currency
    pub fn cost_series(&self, today: NaiveDate, cost: &CostConfig) -> Result<Vec<CostDataPoint>> {
        let start = today - chrono::Duration::days(HISTORY_DAYS);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date(created_at) AS day, SUM(ai_cost_usd) FROM slips
             WHERE ai_cost_usd IS NOT NULL AND date(created_at) >= ? AND date(created_at) <= ?
             GROUP BY day",
        )?;
        let daily_usd: HashMap<String, f64> = stmt
            .query_map(params![start.to_string(), today.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut cumulative = 0.0;
        Ok(start
            .iter_days()
            .take_while(|d| *d <= today)
            .map(|date| {
                let daily = cost.to_display(daily_usd.get(&date.to_string()).copied().unwrap_or(0.0));
                cumulative += daily;
                CostDataPoint {
                    date,
                    daily_cost: round_cents(daily),
                    cumulative: round_cents(cumulative),
                }
            })
            .collect())
    }

    pub fn month_to_date_cost(&self, today: NaiveDate, cost: &CostConfig) -> Result<f64> {
        let month_start = today.with_day(1).unwrap_or(today);
        let conn = self.conn()?;
        let usd: f64 = conn.query_row(
            "SELECT COALESCE(SUM(ai_cost_usd), 0) FROM slips
             WHERE ai_cost_usd IS NOT NULL AND date(created_at) >= ? AND date(created_at) <= ?",
            params![month_start.to_string(), today.to_string()],
            |row| row.get(0),
        )?;
        Ok(round_cents(cost.to_display(usd)))
    }

    /// Most recent HIGH-risk slips
    pub fn flagged_slips(&self, limit: i64) -> Result<Vec<FlaggedSlip>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, retailer_name, total_amount, fraud_risk_score, fraud_flags, status
             FROM slips WHERE fraud_risk_level = 'HIGH'
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                let created_at: String = row.get(1)?;
                let flags: String = row.get(5)?;
                let status: String = row.get(6)?;
                Ok(FlaggedSlip {
                    id: row.get(0)?,
                    created_at: parse_datetime(&created_at),
                    retailer_name: row.get(2)?,
                    total_amount: row.get(3)?,
                    fraud_risk_score: row.get(4)?,
                    fraud_flags: serde_json::from_str(&flags).unwrap_or_default(),
                    status: status.parse().unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
