//! Slip filter builder for the moderation queue queries
//!
//! Shares one WHERE clause between the listing and its count.

use crate::models::SlipFilter;

/// Default page size for queue listings
pub const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

/// Builder turning a [`SlipFilter`] into SQL components
pub struct SlipQuery<'filter> {
    filter: &'filter SlipFilter,
}

/// WHERE clause and its parameters
pub struct FilterResult {
    /// WHERE clause including "WHERE" keyword (empty if no conditions)
    pub where_clause: String,
    /// Parameters for the query (boxed for rusqlite compatibility)
    pub params: Vec<Box<dyn rusqlite::ToSql>>,
}

impl<'filter> SlipQuery<'filter> {
    pub fn new(filter: &'filter SlipFilter) -> Self {
        Self { filter }
    }

    pub fn build(&self) -> FilterResult {
        let f = self.filter;
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = f.status {
            conditions.push("s.status = ?".to_string());
            params.push(Box::new(status.as_str()));
        }

        if let Some(level) = f.risk_level {
            conditions.push("s.fraud_risk_level = ?".to_string());
            params.push(Box::new(level.as_str()));
        }

        if let Some(retailer) = f.retailer.as_deref() {
            if !retailer.trim().is_empty() {
                conditions.push("s.retailer_name LIKE ? COLLATE NOCASE".to_string());
                params.push(Box::new(format!("%{}%", retailer.trim())));
            }
        }

        if let Some(from) = f.from_date {
            conditions.push("s.slip_date >= ?".to_string());
            params.push(Box::new(from.to_string()));
        }

        if let Some(to) = f.to_date {
            conditions.push("s.slip_date <= ?".to_string());
            params.push(Box::new(to.to_string()));
        }

        if f.duplicates_only {
            conditions.push("s.is_duplicate = 1".to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        FilterResult {
            where_clause,
            params,
        }
    }

    /// (limit, offset) with defaults and bounds applied
    pub fn page(&self) -> (i64, i64) {
        let limit = self.filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = self.filter.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

impl FilterResult {
    pub fn build_count_query(&self) -> String {
        format!("SELECT COUNT(*) FROM slips s {}", self.where_clause)
    }

    /// Get parameter references for query execution
    pub fn params_refs(&self) -> Vec<&dyn rusqlite::ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }

    /// Take the parameter vector to append pagination params
    pub fn into_params(self) -> Vec<Box<dyn rusqlite::ToSql>> {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::{RiskLevel, SlipStatus};

    #[test]
    fn test_empty_filter() {
        let filter = SlipFilter::default();
        let query = SlipQuery::new(&filter);
        let result = query.build();
        assert!(result.where_clause.is_empty());
        assert!(result.params.is_empty());
        assert_eq!(query.page(), (DEFAULT_LIMIT, 0));
    }

    #[test]
    fn test_all_conditions() {
        let filter = SlipFilter {
            status: Some(SlipStatus::ManualReview),
            risk_level: Some(RiskLevel::High),
            retailer: Some(" spar ".into()),
            from_date: NaiveDate::from_ymd_opt(2025, 12, 1),
            to_date: NaiveDate::from_ymd_opt(2025, 12, 7),
            duplicates_only: true,
            limit: Some(10_000),
            offset: Some(-3),
        };
        let query = SlipQuery::new(&filter);
        let result = query.build();
        assert_eq!(result.params.len(), 5);
        assert!(result.where_clause.starts_with("WHERE s.status = ?"));
        assert!(result.where_clause.ends_with("s.is_duplicate = 1"));
        assert_eq!(query.page(), (MAX_LIMIT, 0));
    }
}
