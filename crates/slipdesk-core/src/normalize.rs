//! Field normalization for OCR output
//!
//! Canonicalizes retailer names and slip dates into the fixed forms used for
//! storage, duplicate fingerprints and display.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;

/// Sentinel stored when no retailer could be read
pub const UNKNOWN_RETAILER: &str = "Unknown Retailer";

/// Known brand substrings, checked in order
pub const KNOWN_RETAILERS: &[&str] = &[
    "SPAR",
    "CHECKERS",
    "WOOLWORTHS",
    "PICK N PAY",
    "SHOPRITE",
    "CLICKS",
];

/// Formats tried by the generic date parse, after the DD.MM.YY pattern
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
];

fn dotted_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{2})\.(\d{2})\.(\d{2,4})$").expect("static date pattern is valid")
    })
}

/// Canonicalize a retailer name
///
/// Trims and uppercases, then snaps to a known brand when the cleaned name
/// contains one of [`KNOWN_RETAILERS`]. Empty input yields [`UNKNOWN_RETAILER`].
pub fn normalize_retailer(raw: &str) -> String {
    let cleaned = raw.trim().to_uppercase();
    if cleaned.is_empty() {
        return UNKNOWN_RETAILER.to_string();
    }

    KNOWN_RETAILERS
        .iter()
        .find(|brand| cleaned.contains(*brand))
        .map(|brand| brand.to_string())
        .unwrap_or(cleaned)
}

/// Canonicalize a slip date to `YYYY-MM-DD`
///
/// Returns `None` for empty input so the caller decides the fallback.
/// Unparseable input is returned unchanged; callers treat a non-ISO result
/// as a data quality failure.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(caps) = dotted_date_regex().captures(raw) {
        let day = &caps[1];
        let month = &caps[2];
        let year = &caps[3];
        let year = if year.len() == 2 {
            format!("20{}", year)
        } else {
            format!("{:0>4}", year)
        };
        return Some(format!("{}-{}-{}", year, month, day));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive().format("%Y-%m-%d").to_string());
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }

    Some(raw.to_string())
}

/// Whether a normalized date is ISO-shaped and real
pub fn is_iso_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Reformat `YYYY-MM-DD` as `MM/DD/YYYY`; anything else comes back unchanged
pub fn format_for_display(iso: &str) -> String {
    let parts: Vec<&str> = iso.split('-').collect();
    match parts.as_slice() {
        [year, month, day] if !year.is_empty() && !month.is_empty() && !day.is_empty() => {
            format!("{}/{}/{}", month, day, year)
        }
        _ => iso.to_string(),
    }
}

/// Display category for a retailer
pub fn retailer_category(retailer: &str) -> &'static str {
    match normalize_retailer(retailer).as_str() {
        "PICK N PAY" | "CHECKERS" | "SPAR" | "SHOPRITE" => "Grocery",
        "WOOLWORTHS" => "Grocery / Fashion",
        "CLICKS" => "Pharmacy / Health",
        _ => "Other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retailer_snaps_to_brand() {
        assert_eq!(normalize_retailer("spar 123"), "SPAR");
        assert_eq!(normalize_retailer("  Kwikspar Rondebosch "), "SPAR");
        assert_eq!(normalize_retailer("checkers hyper"), "CHECKERS");
        assert_eq!(normalize_retailer("Pick n Pay Family"), "PICK N PAY");
        assert_eq!(normalize_retailer("WOOLWORTHS FOOD"), "WOOLWORTHS");
        assert_eq!(normalize_retailer("shoprite usave"), "SHOPRITE");
        assert_eq!(normalize_retailer("Clicks Pharmacy"), "CLICKS");
    }

    #[test]
    fn test_retailer_unknown_passthrough() {
        assert_eq!(normalize_retailer(" corner cafe "), "CORNER CAFE");
        assert_eq!(normalize_retailer(""), UNKNOWN_RETAILER);
        assert_eq!(normalize_retailer("   "), UNKNOWN_RETAILER);
    }

    #[test]
    fn test_retailer_idempotent() {
        for raw in ["spar 123", "Corner Cafe", "pick n pay", ""] {
            let once = normalize_retailer(raw);
            if once != UNKNOWN_RETAILER {
                assert_eq!(normalize_retailer(&once), once);
            }
        }
        for brand in KNOWN_RETAILERS {
            assert_eq!(normalize_retailer(brand), *brand);
        }
    }

    #[test]
    fn test_dotted_dates() {
        assert_eq!(normalize_date("01.12.25").as_deref(), Some("2025-12-01"));
        assert_eq!(normalize_date("31.01.2024").as_deref(), Some("2024-01-31"));
        assert_eq!(normalize_date("05.06.07").as_deref(), Some("2007-06-05"));
        assert_eq!(normalize_date("05.06.123").as_deref(), Some("0123-06-05"));
    }

    #[test]
    fn test_generic_dates() {
        assert_eq!(normalize_date("2025-01-12").as_deref(), Some("2025-01-12"));
        assert_eq!(normalize_date("01/12/2025").as_deref(), Some("2025-01-12"));
        assert_eq!(
            normalize_date("2025-03-04T10:15:00Z").as_deref(),
            Some("2025-03-04")
        );
        assert_eq!(normalize_date("4 Mar 2025").as_deref(), Some("2025-03-04"));
        assert_eq!(normalize_date("March 4, 2025").as_deref(), Some("2025-03-04"));
    }

    #[test]
    fn test_unparseable_and_empty_dates() {
        assert_eq!(normalize_date("not a date").as_deref(), Some("not a date"));
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("  "), None);
        assert!(!is_iso_date("not a date"));
        assert!(is_iso_date("2025-12-01"));
    }

    #[test]
    fn test_format_for_display() {
        assert_eq!(format_for_display("2025-12-01"), "12/01/2025");
        assert_eq!(format_for_display(""), "");
        assert_eq!(format_for_display("garbage"), "garbage");
        assert_eq!(format_for_display("2025-12"), "2025-12");
    }

    #[test]
    fn test_retailer_category() {
        assert_eq!(retailer_category("Pick n Pay"), "Grocery");
        assert_eq!(retailer_category("woolworths"), "Grocery / Fashion");
        assert_eq!(retailer_category("CLICKS"), "Pharmacy / Health");
        assert_eq!(retailer_category("Corner Cafe"), "Other");
    }
}
