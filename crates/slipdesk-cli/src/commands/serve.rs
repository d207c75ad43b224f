//! Server command implementation

use std::path::Path;

use anyhow::Result;
use slipdesk_core::OcrBackend;
use slipdesk_server::ServerConfig;

use super::{open_db, open_pipeline};

pub async fn cmd_serve(
    db_path: &Path,
    config_path: Option<&Path>,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
) -> Result<()> {
    println!("🚀 Starting Slipdesk API server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);

    let mut config = ServerConfig::from_env();

    if no_auth {
        config.require_auth = false;
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else {
        config.require_auth = true;
        if config.api_keys.is_empty() {
            println!("   ❌ No API keys configured; every /api request will be rejected");
            println!("      Set SLIPDESK_API_KEYS or use --no-auth for local development");
        } else {
            println!(
                "   🔑 API keys: {} configured (SLIPDESK_API_KEYS)",
                config.api_keys.len()
            );
        }
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }

    let db = open_db(db_path, no_encrypt)?;
    let pipeline = open_pipeline(db, config_path)?;
    println!(
        "   🤖 OCR: {} (model: {})",
        pipeline.ocr().host(),
        pipeline.ocr().model()
    );
    println!();
    println!("   Press Ctrl+C to stop");

    slipdesk_server::serve_with_config(pipeline, host, port, config).await?;

    Ok(())
}
