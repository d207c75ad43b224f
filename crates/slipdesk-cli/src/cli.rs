//! CLI argument definitions using clap
//!
//! This module contains the clap structs and enums for parsing CLI arguments.
//! The command implementations live in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Slipdesk - Till-slip ingestion and moderation
#[derive(Parser)]
#[command(name = "slipdesk")]
#[command(about = "Till-slip OCR ingestion, fraud scoring and moderation queue", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "slipdesk.db", global = true)]
    pub db: PathBuf,

    /// Pipeline config file (defaults to SLIPDESK_CONFIG, then the data-dir override)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set SLIPDESK_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// OCR, score and store a single slip image
    Process {
        /// Image URL to process
        image_url: String,

        /// Submitting user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Ingest many slip images with a bounded worker pool
    Bulk {
        /// Image URLs to process
        image_urls: Vec<String>,

        /// File with one image URL per line ('#' starts a comment)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Parallel workers: 1, 3, 5 or 10 (defaults to the configured value)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Submitting user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Browse the moderation queue
    Slips {
        #[command(subcommand)]
        action: Option<SlipsAction>,
    },

    /// Moderate a slip
    Review {
        /// Moderator recorded in the audit trail
        #[arg(long = "as", default_value = "cli", global = true)]
        moderator: String,

        /// Fail unless the slip is still in this status
        #[arg(long, global = true)]
        expect: Option<String>,

        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Show the audit trail
    Activity {
        /// Only this slip, oldest first
        #[arg(long)]
        slip: Option<i64>,

        /// Maximum entries for the cross-slip feed
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show dashboard summary
    Dashboard {
        /// Refresh every 30 seconds until interrupted
        #[arg(short, long)]
        watch: bool,
    },

    /// Repair slips whose line items or payments were not stored
    Reconcile,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "SLIPDESK_PORT", default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable API key authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
pub enum SlipsAction {
    /// List slips (default)
    List {
        /// Filter by status (pending, manual_review, approved, ...)
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by risk level (LOW, MEDIUM, HIGH)
        #[arg(short, long)]
        risk: Option<String>,

        /// Retailer name substring
        #[arg(long)]
        retailer: Option<String>,

        /// Earliest slip date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Latest slip date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Only duplicates
        #[arg(long)]
        duplicates: bool,

        /// Maximum number of slips
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show one slip with items, payments, validation and fraud analysis
    Show {
        /// Slip ID
        id: i64,
    },

    /// Print the slip as exported receipt JSON
    Export {
        /// Slip ID
        id: i64,
    },

    /// Delete a slip and everything it owns
    Delete {
        /// Slip ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ReviewAction {
    /// Approve as extracted
    Approve {
        /// Slip ID
        id: i64,
    },

    /// Reject with a reason
    Reject {
        /// Slip ID
        id: i64,

        /// Reason (see `slipdesk review reasons`)
        #[arg(short, long)]
        reason: String,
    },

    /// Approve with corrected fields
    Correct {
        /// Slip ID
        id: i64,

        /// Field override as name=value (repeatable), e.g. --set total_amount=89.97
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        fields: Vec<String>,

        /// Line item override as id.name=value (repeatable), e.g. --item 12.unit_price=9.99
        #[arg(long = "item", value_name = "ID.FIELD=VALUE")]
        items: Vec<String>,
    },

    /// Send back to manual review with a note
    Escalate {
        /// Slip ID
        id: i64,

        /// Escalation note
        #[arg(short, long)]
        note: String,
    },

    /// Add a note without changing status
    Note {
        /// Slip ID
        id: i64,

        /// Note text
        note: String,
    },

    /// List canonical rejection reasons
    Reasons,
}
