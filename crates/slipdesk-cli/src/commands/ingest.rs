//! Ingestion commands (process, bulk)

use std::path::Path;

use anyhow::{bail, Context, Result};
use slipdesk_core::{BulkIngest, BulkItemState, BulkOptions, BulkReport, IngestOutcome, Pipeline};

use super::{print_ocr_backend, truncate};

/// Process one slip image and print the outcome
pub async fn cmd_process(
    pipeline: &Pipeline,
    image_url: &str,
    user_id: Option<&str>,
) -> Result<IngestOutcome> {
    println!("📷 Processing {}...", image_url);
    print_ocr_backend(pipeline).await;

    let outcome = pipeline
        .process(image_url, user_id)
        .await
        .context("Failed to process slip")?;

    print_outcome(&outcome);
    Ok(outcome)
}

fn print_outcome(outcome: &IngestOutcome) {
    let receipt = &outcome.exported;
    println!();
    println!("🧾 Slip #{}", outcome.slip_id);
    println!("   ─────────────────────────────");
    println!("   Retailer:  {}", receipt.retailer_name);
    println!("   Date:      {} {}", receipt.date, receipt.time);
    println!("   Total:     {:.2}", receipt.slip_total);
    println!("   Items:     {}", receipt.product_line_items.len());
    println!("   Status:    {}", outcome.status);
    println!(
        "   Fraud:     {:.2} ({})",
        outcome.fraud.score,
        outcome.fraud.band.as_str()
    );
    if !outcome.fraud.flags.is_empty() {
        println!("   Flags:     {}", outcome.fraud.flags.join(", "));
    }
    if outcome.is_duplicate {
        match outcome.duplicate_of {
            Some(original) => println!("   👯 Duplicate of slip #{}", original),
            None => println!("   👯 Duplicate"),
        }
    }
    for warning in &outcome.warnings {
        println!("   ⚠️  {}", warning);
    }
}

/// Read image URLs from a file, one per line
pub fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Ingest many slip images with a bounded worker pool
pub async fn cmd_bulk(
    pipeline: &Pipeline,
    mut image_urls: Vec<String>,
    file: Option<&Path>,
    concurrency: Option<usize>,
    user_id: Option<String>,
) -> Result<BulkReport> {
    if let Some(file) = file {
        image_urls.extend(read_url_file(file)?);
    }
    if image_urls.is_empty() {
        bail!("No image URLs given. Pass URLs as arguments or use --file");
    }

    let options = BulkOptions {
        concurrency: concurrency.unwrap_or(pipeline.config().bulk.concurrency),
        user_id,
    };
    options.validate()?;

    println!(
        "📦 Processing {} slip(s) with {} worker(s)...",
        image_urls.len(),
        options.concurrency
    );
    print_ocr_backend(pipeline).await;

    let bulk = BulkIngest::new(pipeline.clone());
    let control = bulk.control();
    // Ctrl+C stops scheduling; in-flight slips still finish
    let cancel_on_interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n⏹  Cancelling, waiting for in-flight slips...");
            control.cancel();
        }
    });

    let report = bulk.run(image_urls, &options).await;
    cancel_on_interrupt.abort();
    let report = report?;

    println!();
    for item in &report.results {
        let url = truncate(&item.image_url, 48);
        match &item.state {
            BulkItemState::Done { outcome } => {
                let dup = if outcome.is_duplicate { " (duplicate)" } else { "" };
                println!(
                    "   ✅ {:<3} {:<48} #{} {}{}",
                    item.index + 1,
                    url,
                    outcome.slip_id,
                    outcome.status,
                    dup
                );
            }
            BulkItemState::Failed { error } => {
                println!("   ❌ {:<3} {:<48} {}", item.index + 1, url, error);
            }
            BulkItemState::Skipped => {
                println!("   ⏭  {:<3} {:<48} skipped", item.index + 1, url);
            }
        }
    }

    println!();
    println!(
        "📊 {} completed, {} failed, {} skipped (of {})",
        report.completed, report.failed, report.skipped, report.total
    );

    Ok(report)
}
