//! Dashboard command

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use slipdesk_core::db::Database;
use slipdesk_core::{DashboardStats, PipelineConfig};

use super::truncate;

/// Refresh period for `dashboard --watch`
pub const WATCH_INTERVAL: Duration = Duration::from_secs(30);

pub fn print_dashboard(stats: &DashboardStats) {
    let c = &stats.counts;

    println!();
    println!("╭─────────────────────────────────────────╮");
    println!("│          🧾 Slipdesk Dashboard          │");
    println!("╰─────────────────────────────────────────╯");
    println!("  {}", stats.today);
    println!();
    println!(
        "  Slips today:       {} (yesterday {})",
        c.today_slips, c.yesterday_slips
    );
    println!("  Auto-approved:     {}", c.auto_approved_today);
    println!("  🔎 Pending review: {}", c.pending_review);
    if c.fraud_today > 0 {
        println!("  🚨 High risk today: {}", c.fraud_today);
    }
    println!(
        "  💸 AI cost (MTD):  {:.2} {}",
        stats.month_to_date_cost, stats.currency
    );

    if !stats.status_breakdown.is_empty() {
        println!();
        println!("  By status");
        for entry in &stats.status_breakdown {
            println!("    {:<16} {:>6}", entry.name, entry.count);
        }
    }

    if !stats.top_retailers.is_empty() {
        println!();
        println!("  Top retailers");
        for entry in &stats.top_retailers {
            println!("    {:<24} {:>6}", truncate(&entry.name, 24), entry.count);
        }
    }

    if !stats.flagged.is_empty() {
        println!();
        println!("  ⚠️  High-risk slips");
        for slip in &stats.flagged {
            println!(
                "    #{:<5} {:<20} {:>9.2}  {:.2}  {}",
                slip.id,
                truncate(&slip.retailer_name, 20),
                slip.total_amount,
                slip.fraud_risk_score.unwrap_or_default(),
                slip.fraud_flags.join(", ")
            );
        }
    }

    if !stats.recent_activity.is_empty() {
        println!();
        println!("  Recent activity");
        for item in stats.recent_activity.iter().take(5) {
            println!(
                "    {}  #{:<5} {:<10} {}",
                item.entry.created_at.format("%m-%d %H:%M"),
                item.entry.slip_id,
                item.entry.action.as_str(),
                item.entry.actor()
            );
        }
    }
    println!();
}

/// Print the dashboard once, or every 30 seconds with `watch`
pub async fn cmd_dashboard(db: &Database, config: &PipelineConfig, watch: bool) -> Result<()> {
    loop {
        let stats = db.dashboard_stats(Utc::now().date_naive(), &config.cost)?;
        if watch {
            // Clear screen and home the cursor
            print!("\x1B[2J\x1B[H");
        }
        print_dashboard(&stats);

        if !watch {
            return Ok(());
        }
        println!("  Refreshing every {}s, Ctrl+C to stop", WATCH_INTERVAL.as_secs());

        tokio::select! {
            _ = tokio::time::sleep(WATCH_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
