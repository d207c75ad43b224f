//! Exact-match duplicate detection
//!
//! A slip is a duplicate when an earlier slip has the same
//! `(retailer, date, total_amount)` fingerprint. No tolerance on the amount
//! and no date window.

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::Result;
use crate::models::ProcessedReceipt;

/// Hex SHA-256 of the `(retailer, date, total)` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(retailer: &str, date: &str, total: f64) -> Self {
        // -0.0 and 0.0 must hash the same
        let total = if total == 0.0 { 0.0 } else { total };
        let mut hasher = Sha256::new();
        hasher.update(retailer.as_bytes());
        hasher.update(b"|");
        hasher.update(date.as_bytes());
        hasher.update(b"|");
        hasher.update(total.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn of(receipt: &ProcessedReceipt) -> Self {
        Self::new(&receipt.retailer, &receipt.date, receipt.total_amount)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Query capability over previously persisted slips
pub trait FingerprintLookup {
    /// Id of a stored slip with this fingerprint, if any
    fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<i64>>;
}

/// Outcome of a duplicate check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub matched_id: Option<i64>,
}

impl DuplicateCheck {
    pub fn unique() -> Self {
        Self::default()
    }
}

/// Check a candidate against prior slips
///
/// Does not mutate anything. When the lookup is unavailable or fails the
/// candidate is treated as unique and a warning is logged.
pub fn check_duplicate(
    fingerprint: &Fingerprint,
    lookup: Option<&dyn FingerprintLookup>,
) -> DuplicateCheck {
    let Some(lookup) = lookup else {
        warn!(%fingerprint, "Duplicate lookup unavailable, treating slip as unique");
        return DuplicateCheck::unique();
    };

    match lookup.find_by_fingerprint(fingerprint) {
        Ok(Some(id)) => DuplicateCheck {
            is_duplicate: true,
            matched_id: Some(id),
        },
        Ok(None) => DuplicateCheck::unique(),
        Err(e) => {
            warn!(%fingerprint, error = %e, "Duplicate lookup failed, treating slip as unique");
            DuplicateCheck::unique()
        }
    }
}
