//! Audit trail command

use anyhow::{anyhow, Result};
use slipdesk_core::db::Database;
use slipdesk_core::models::ActivityLogEntry;

use super::truncate;

fn print_entry(entry: &ActivityLogEntry) {
    let transition = match (entry.from_status, entry.to_status) {
        (Some(from), Some(to)) if from != to => format!(" {} → {}", from, to),
        _ => String::new(),
    };
    println!(
        "  {}  {:<10} {:<12}{}",
        entry.created_at.format("%Y-%m-%d %H:%M"),
        entry.action.as_str(),
        truncate(entry.actor(), 12),
        transition
    );
    if let Some(details) = &entry.details {
        println!("                    {}", details);
    }
}

/// Show one slip's history, or the latest activity across all slips
pub fn cmd_activity(db: &Database, slip_id: Option<i64>, limit: i64) -> Result<()> {
    match slip_id {
        Some(id) => {
            if db.get_slip(id)?.is_none() {
                return Err(anyhow!("Slip #{} not found", id));
            }
            let entries = db.list_activity(id)?;
            println!();
            println!("📜 Activity for slip #{}", id);
            println!("{}", "─".repeat(70));
            if entries.is_empty() {
                println!("  (none)");
            }
            for entry in &entries {
                print_entry(entry);
            }
        }
        None => {
            let items = db.recent_activity(limit.max(1))?;
            println!();
            println!("📜 Recent activity");
            println!("{}", "─".repeat(70));
            if items.is_empty() {
                println!("  (none)");
            }
            for item in &items {
                let amount = item
                    .slip_amount
                    .map(|a| format!("{:.2}", a))
                    .unwrap_or_else(|| "-".into());
                println!(
                    "  #{:<5} {} {}",
                    item.entry.slip_id,
                    item.slip_retailer.as_deref().unwrap_or("Unknown"),
                    amount
                );
                print_entry(&item.entry);
            }
        }
    }

    println!();
    Ok(())
}
