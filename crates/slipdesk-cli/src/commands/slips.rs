//! Moderation queue commands (list, show, export, delete)

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use slipdesk_core::db::Database;
use slipdesk_core::models::{RiskLevel, SlipFilter, SlipStatus};
use slipdesk_core::{analyze_flags, export_slip, Pipeline};

use super::{truncate, yes_no};

/// Parse a YYYY-MM-DD command-line date
pub fn parse_date_arg(value: Option<&str>, flag: &str) -> Result<Option<NaiveDate>> {
    value
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .with_context(|| format!("Invalid {} date format (use YYYY-MM-DD)", flag))
}

/// Build a queue filter from command-line values
pub fn build_filter(
    status: Option<&str>,
    risk: Option<&str>,
    retailer: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
    duplicates: bool,
    limit: i64,
) -> Result<SlipFilter> {
    let status = status
        .map(|s| s.parse::<SlipStatus>())
        .transpose()
        .map_err(|e| anyhow!(e))?;
    let risk_level = risk
        .map(|s| s.parse::<RiskLevel>())
        .transpose()
        .map_err(|e| anyhow!(e))?;

    Ok(SlipFilter {
        status,
        risk_level,
        retailer: retailer.map(str::to_string),
        from_date: parse_date_arg(from, "--from")?,
        to_date: parse_date_arg(to, "--to")?,
        duplicates_only: duplicates,
        limit: Some(limit),
        offset: None,
    })
}

pub fn cmd_slips_list(db: &Database, filter: &SlipFilter) -> Result<()> {
    let slips = db.list_slips(filter)?;
    let total = db.count_slips(filter)?;

    if slips.is_empty() {
        println!("No slips match. Process one with:");
        println!("  slipdesk process https://example.com/slip.jpg");
        return Ok(());
    }

    println!();
    println!("🧾 Slips ({} of {})", slips.len(), total);
    println!("{}", "─".repeat(86));

    for slip in &slips {
        let risk = slip
            .fraud_risk_level
            .map(|l| l.as_str())
            .unwrap_or("-");
        let dup = if slip.is_duplicate { " 👯" } else { "" };
        println!(
            "  #{:<5} {:<10} {:<24} {:>10.2}  {:<14} {:<6}{}",
            slip.id,
            slip.slip_date,
            truncate(&slip.retailer_name, 24),
            slip.effective_total(),
            slip.status.as_str(),
            risk,
            dup
        );
    }

    println!();
    Ok(())
}

pub fn cmd_slips_show(pipeline: &Pipeline, id: i64) -> Result<()> {
    let detail = pipeline
        .db()
        .get_slip_detail(id)?
        .ok_or_else(|| anyhow!("Slip #{} not found", id))?;
    let slip = &detail.slip;
    let validation = pipeline.validation_for(slip, Utc::now().date_naive());
    let analysis = analyze_flags(
        slip.fraud_risk_score,
        &slip.fraud_flags,
        &pipeline.config().risk_bands,
    );

    let text = |field: &str| slip.effective_text(field).unwrap_or_else(|| "-".into());
    let mark = |field: &str| if slip.is_field_corrected(field) { " ✏️" } else { "" };

    println!();
    println!("🧾 Slip #{} ({})", slip.id, slip.status);
    println!("   ─────────────────────────────────────────────");
    println!("   Retailer:   {}{}", text("retailer_name"), mark("retailer_name"));
    println!("   Branch:     {}{}", text("store_branch"), mark("store_branch"));
    let inferred = if slip.date_inferred { " (inferred)" } else { "" };
    println!(
        "   Date:       {} {}{}{}",
        text("slip_date"),
        text("slip_time"),
        inferred,
        mark("slip_date")
    );
    println!("   Total:      {:.2}{}", slip.effective_total(), mark("total_amount"));
    println!("   Receipt #:  {}{}", text("receipt_number"), mark("receipt_number"));
    println!("   Image:      {}", slip.image_url);
    if let Some(user) = &slip.user_id {
        println!("   User:       {}", user);
    }
    if let Some(original) = slip.duplicate_of {
        println!("   👯 Duplicate of slip #{}", original);
    }
    if let Some(notes) = &slip.review_notes {
        println!("   Notes:      {}", notes);
    }

    if !detail.line_items.is_empty() {
        println!();
        println!("   Items");
        for item in &detail.line_items {
            let description = item
                .corrected_description
                .as_deref()
                .unwrap_or(&item.description);
            let total = item.corrected_total_price.unwrap_or(item.final_price);
            let edited = if item.is_corrected { " ✏️" } else { "" };
            println!(
                "     [{}] {:<32} x{:<4} {:>9.2}{}",
                item.id,
                truncate(description, 32),
                item.corrected_quantity.unwrap_or(item.quantity),
                total,
                edited
            );
        }
    }

    if !detail.payments.is_empty() {
        println!();
        println!("   Payments");
        for payment in &detail.payments {
            println!("     {:<20} {:>9.2}", payment.method, payment.amount);
        }
    }

    println!();
    println!("   Validation");
    println!("     Approved retailer: {}", yes_no(validation.approved_retailer.as_option()));
    println!(
        "     Within window:     {}",
        yes_no(validation.within_freshness_window.as_option())
    );
    println!("     Sufficient data:   {}", yes_no(validation.sufficient_data.as_option()));
    if !validation.missing_fields.is_empty() {
        println!("     Missing:           {}", validation.missing_fields.join(", "));
    }

    println!();
    match (slip.fraud_risk_score, analysis.band) {
        (Some(score), Some(band)) => println!("   Fraud risk: {:.2} ({})", score, band.as_str()),
        _ => println!("   Fraud risk: not scored"),
    }
    for (section, flags) in [
        ("Photo", &analysis.photo),
        ("Tampering", &analysis.tampering),
        ("Consistency", &analysis.consistency),
        ("Other", &analysis.other),
    ] {
        if flags.is_empty() {
            continue;
        }
        let rendered: Vec<String> = flags
            .iter()
            .map(|f| format!("{} ({:?})", f.flag, f.severity).to_lowercase())
            .collect();
        println!("     {:<12} {}", section, rendered.join(", "));
    }

    println!();
    Ok(())
}

pub fn cmd_slips_export(db: &Database, id: i64) -> Result<()> {
    let detail = db
        .get_slip_detail(id)?
        .ok_or_else(|| anyhow!("Slip #{} not found", id))?;
    println!("{}", serde_json::to_string_pretty(&export_slip(&detail))?);
    Ok(())
}

pub fn cmd_slips_delete(db: &Database, id: i64) -> Result<()> {
    if !db.delete_slip(id)? {
        bail!("Slip #{} not found", id);
    }
    println!("🗑️  Deleted slip #{}", id);
    Ok(())
}
