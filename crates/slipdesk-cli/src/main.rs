//! Slipdesk CLI - Till-slip ingestion and moderation
//!
//! Usage:
//!   slipdesk init                      Initialize database
//!   slipdesk process URL               OCR, score and store one slip
//!   slipdesk bulk --file urls.txt      Ingest many slips
//!   slipdesk review approve 12         Moderate a slip
//!   slipdesk serve --port 3000         Start the API server

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use slipdesk_core::ModeratorAction;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Process { image_url, user } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::open_pipeline(db, config_path)?;
            commands::cmd_process(&pipeline, &image_url, user.as_deref())
                .await
                .map(|_| ())
        }
        Commands::Bulk {
            image_urls,
            file,
            concurrency,
            user,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::open_pipeline(db, config_path)?;
            commands::cmd_bulk(&pipeline, image_urls, file.as_deref(), concurrency, user)
                .await
                .map(|_| ())
        }
        Commands::Slips { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => {
                    let filter = commands::build_filter(None, None, None, None, None, false, 20)?;
                    commands::cmd_slips_list(&db, &filter)
                }
                Some(SlipsAction::List {
                    status,
                    risk,
                    retailer,
                    from,
                    to,
                    duplicates,
                    limit,
                }) => {
                    let filter = commands::build_filter(
                        status.as_deref(),
                        risk.as_deref(),
                        retailer.as_deref(),
                        from.as_deref(),
                        to.as_deref(),
                        duplicates,
                        limit,
                    )?;
                    commands::cmd_slips_list(&db, &filter)
                }
                Some(SlipsAction::Show { id }) => {
                    let pipeline = commands::offline_pipeline(db, config_path)?;
                    commands::cmd_slips_show(&pipeline, id)
                }
                Some(SlipsAction::Export { id }) => commands::cmd_slips_export(&db, id),
                Some(SlipsAction::Delete { id }) => commands::cmd_slips_delete(&db, id),
            }
        }
        Commands::Review {
            moderator,
            expect,
            action,
        } => {
            if let ReviewAction::Reasons = action {
                return commands::cmd_review_reasons();
            }
            let expected = commands::parse_expected(expect.as_deref())?;
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::offline_pipeline(db, config_path)?;
            let m = moderator.as_str();
            let result = match action {
                ReviewAction::Approve { id } => {
                    commands::cmd_review(&pipeline, id, ModeratorAction::Approve, m, expected)
                }
                ReviewAction::Reject { id, reason } => commands::cmd_review(
                    &pipeline,
                    id,
                    ModeratorAction::Reject { reason },
                    m,
                    expected,
                ),
                ReviewAction::Correct { id, fields, items } => {
                    commands::cmd_review_correct(&pipeline, id, &fields, &items, m, expected)
                }
                ReviewAction::Escalate { id, note } => commands::cmd_review(
                    &pipeline,
                    id,
                    ModeratorAction::Escalate { note },
                    m,
                    expected,
                ),
                ReviewAction::Note { id, note } => commands::cmd_review(
                    &pipeline,
                    id,
                    ModeratorAction::AddNote { note },
                    m,
                    expected,
                ),
                ReviewAction::Reasons => return Ok(()),
            };
            result.map(|_| ())
        }
        Commands::Activity { slip, limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_activity(&db, slip, limit)
        }
        Commands::Dashboard { watch } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let config = commands::load_config(config_path)?;
            commands::cmd_dashboard(&db, &config, watch).await
        }
        Commands::Reconcile => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::offline_pipeline(db, config_path)?;
            commands::cmd_reconcile(&pipeline).map(|_| ())
        }
        Commands::Serve {
            port,
            host,
            no_auth,
        } => {
            commands::cmd_serve(&cli.db, config_path, &host, port, no_auth, cli.no_encrypt).await
        }
    }
}
