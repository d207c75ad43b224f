//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and reconcile, plus shared utilities (open_db, open_pipeline)
//! - `ingest` - Single and bulk slip ingestion
//! - `slips` - Moderation queue browsing (list, show, export, delete)
//! - `review` - Moderator actions
//! - `activity` - Audit trail
//! - `dashboard` - Dashboard summary
//! - `serve` - Web server command

pub mod activity;
pub mod core;
pub mod dashboard;
pub mod ingest;
pub mod review;
pub mod serve;
pub mod slips;

// Re-export command functions for main.rs
pub use activity::*;
pub use core::*;
pub use dashboard::*;
pub use ingest::*;
pub use review::*;
pub use serve::*;
pub use slips::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Render an optional check result
pub fn yes_no(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "unknown",
    }
}
