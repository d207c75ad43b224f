//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `open_pipeline` - Database, OCR backend and config wired together
//! - `cmd_init` - Initialize the database
//! - `cmd_reconcile` - Repair slips with missing child rows

use std::path::Path;

use anyhow::{Context, Result};
use slipdesk_core::{db::Database, OcrBackend, OcrClient, Pipeline, PipelineConfig};
use tracing::{debug, warn};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Resolve the pipeline config from --config, SLIPDESK_CONFIG or the data-dir override
pub fn load_config(config_path: Option<&Path>) -> Result<PipelineConfig> {
    PipelineConfig::load(config_path).context("Failed to load pipeline config")
}

/// Build a pipeline over an open database using the OCR backend from the environment
pub fn open_pipeline(db: Database, config_path: Option<&Path>) -> Result<Pipeline> {
    let config = load_config(config_path)?;
    let ocr = OcrClient::from_env()
        .context("OCR backend not configured. Set OCR_HOST for openai_compatible, or OCR_BACKEND=mock")?;
    debug!(host = ocr.host(), model = ocr.model(), "OCR backend selected");
    Ok(Pipeline::new(db, ocr, config))
}

/// Pipeline for commands that only read or moderate stored slips
pub fn offline_pipeline(db: Database, config_path: Option<&Path>) -> Result<Pipeline> {
    Ok(Pipeline::new(db, OcrClient::mock(), load_config(config_path)?))
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    // Migrations run on open
    let _db = open_db(db_path, no_encrypt)?;

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Process a slip: slipdesk process https://example.com/slip.jpg");
    println!("  2. Start the API: slipdesk serve");

    Ok(())
}

/// Re-derive missing line items and payments from stored OCR responses
///
/// Returns the number of slips repaired.
pub fn cmd_reconcile(pipeline: &Pipeline) -> Result<usize> {
    let incomplete = pipeline.find_incomplete()?;

    if incomplete.is_empty() {
        println!("✅ Every slip has its line items and payments.");
        return Ok(0);
    }

    println!("🔧 Reconciling {} slip(s)...", incomplete.len());

    let mut repaired = 0;
    for slip in &incomplete {
        match pipeline.reconcile(slip.slip_id) {
            Ok(report) => {
                println!(
                    "   #{:<5} +{} item(s), +{} payment(s)",
                    report.slip_id, report.items_inserted, report.payments_inserted
                );
                if report.items_inserted > 0 || report.payments_inserted > 0 {
                    repaired += 1;
                }
            }
            Err(e) => {
                warn!(slip_id = slip.slip_id, error = %e, "Reconcile failed");
                println!("   #{:<5} ❌ {}", slip.slip_id, e);
            }
        }
    }

    println!();
    println!("✅ Repaired {} of {} slip(s)", repaired, incomplete.len());
    Ok(repaired)
}

/// Print the OCR backend in use
pub async fn print_ocr_backend(pipeline: &Pipeline) {
    let ocr = pipeline.ocr();
    if ocr.health_check().await {
        println!("   🤖 OCR: {} (model: {})", ocr.host(), ocr.model());
    } else {
        println!("   ⚠️  OCR backend not responding: {} (model: {})", ocr.host(), ocr.model());
    }
}
