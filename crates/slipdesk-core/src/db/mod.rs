//! Persistence gateway with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `slips` - Slip, line item and payment rows, moderation writes
//! - `slip_filter` - Queue listing filters
//! - `activity` - Append-only activity log
//! - `stats` - Dashboard aggregates
//!
//! Every write publishes a [`ChangeEvent`] on the database's [`ChangeFeed`].

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};
use crate::events::{ChangeEvent, ChangeFeed, ChangeFilter, Subscription};

mod activity;
mod slip_filter;
mod slips;
mod stats;

pub use slip_filter::{FilterResult, SlipQuery};
pub use slips::IncompleteSlip;
pub use stats::{
    CostDataPoint, DashboardStats, FlaggedSlip, HeadlineCounts, NamedCount, VolumePoint,
};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "SLIPDESK_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// A fixed application salt keeps the key independent of the database path,
/// so the file can be moved or restored freely.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted database
    const APP_SALT: &[u8; 16] = b"slipdesk-salt-v1";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let hash = Argon2::default()
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Format a timestamp the way SQLite's CURRENT_TIMESTAMP does
pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Database wrapper with connection pooling and a change feed
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
    feed: ChangeFeed,
}

impl Database {
    /// Open an encrypted database
    ///
    /// Requires `SLIPDESK_DB_KEY`; the SQLCipher key is derived from it with
    /// Argon2. Use `new_unencrypted()` for development.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Open an unencrypted database (development and tests only)
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Open a database with an explicit encryption passphrase
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let key_pragma = match passphrase {
            Some(pass) => format!("PRAGMA key = 'x\"{}\"';", derive_key(pass)?),
            None => String::new(),
        };

        // foreign_keys is per connection, so it is set on every checkout
        let init = format!("{} PRAGMA foreign_keys = ON;", key_pragma);
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.execute_batch(&init)?;
            Ok(())
        });
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
            feed: ChangeFeed::default(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` because SQLCipher has
    /// issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "slipdesk_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path.to_string_lossy())
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// The feed every write on this database publishes to
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.feed.subscribe(filter)
    }

    pub(crate) fn publish(&self, event: ChangeEvent) {
        self.feed.publish(event);
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block writers
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Slips (one per uploaded till-slip image)
            CREATE TABLE IF NOT EXISTS slips (
                id INTEGER PRIMARY KEY,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                image_url TEXT NOT NULL,
                user_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',

                ai_processed_at DATETIME,
                ai_processing_time_ms INTEGER,
                ai_model_used TEXT,
                ai_cost_usd REAL,
                recommended_action TEXT,                  -- AUTO_APPROVE, AUTO_REJECT, MANUAL_REVIEW
                ai_response TEXT,                         -- JSON of the canonical OCR response
                extraction_confidence REAL,               -- 0..1

                reviewed_by TEXT,
                reviewed_at DATETIME,
                review_notes TEXT,

                retailer_name TEXT NOT NULL,
                store_branch TEXT,
                slip_date TEXT NOT NULL,                  -- ISO date, raw text, or empty
                date_inferred BOOLEAN NOT NULL DEFAULT 0,
                slip_time TEXT NOT NULL,
                total_amount REAL NOT NULL,
                vat_amount REAL,
                payment_method TEXT,
                till_number TEXT,
                receipt_number TEXT,
                barcode_data TEXT,
                line_items_count INTEGER NOT NULL DEFAULT 0,
                payments_count INTEGER NOT NULL DEFAULT 0,
                defaults_applied TEXT NOT NULL DEFAULT '[]',  -- JSON array

                is_blurry BOOLEAN NOT NULL DEFAULT 0,
                is_screen BOOLEAN NOT NULL DEFAULT 0,
                is_receipt BOOLEAN NOT NULL DEFAULT 1,

                approved_retailer BOOLEAN,                -- NULL = unknown
                slip_within_7_days BOOLEAN,
                is_valid BOOLEAN,

                fraud_risk_score REAL,
                fraud_risk_level TEXT,                    -- LOW, MEDIUM, HIGH
                is_direct_photo BOOLEAN,
                fraud_flags TEXT NOT NULL DEFAULT '[]',   -- JSON array

                corrected_data TEXT,                      -- JSON {fields, lineItems}
                was_corrected BOOLEAN NOT NULL DEFAULT 0,

                fingerprint TEXT NOT NULL,                -- sha256(retailer|date|total)
                is_duplicate BOOLEAN NOT NULL DEFAULT 0,
                duplicate_of INTEGER REFERENCES slips(id) ON DELETE SET NULL
            );

            -- At most one original per fingerprint; losing racers become duplicates
            CREATE UNIQUE INDEX IF NOT EXISTS idx_slips_fingerprint_original
                ON slips(fingerprint) WHERE is_duplicate = 0;
            CREATE INDEX IF NOT EXISTS idx_slips_status ON slips(status);
            CREATE INDEX IF NOT EXISTS idx_slips_created ON slips(created_at);
            CREATE INDEX IF NOT EXISTS idx_slips_slip_date ON slips(slip_date);
            CREATE INDEX IF NOT EXISTS idx_slips_retailer ON slips(retailer_name);
            CREATE INDEX IF NOT EXISTS idx_slips_risk ON slips(fraud_risk_level);

            CREATE TABLE IF NOT EXISTS slip_line_items (
                id INTEGER PRIMARY KEY,
                slip_id INTEGER NOT NULL REFERENCES slips(id) ON DELETE CASCADE,
                line_number INTEGER NOT NULL,
                description TEXT NOT NULL,
                quantity REAL NOT NULL,
                unit_price REAL NOT NULL,
                total_price REAL NOT NULL,
                discount REAL NOT NULL DEFAULT 0,
                final_price REAL NOT NULL,
                corrected_description TEXT,
                corrected_quantity REAL,
                corrected_unit_price REAL,
                corrected_total_price REAL,
                is_corrected BOOLEAN NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_line_items_slip ON slip_line_items(slip_id);

            CREATE TABLE IF NOT EXISTS slip_payments (
                id INTEGER PRIMARY KEY,
                slip_id INTEGER NOT NULL REFERENCES slips(id) ON DELETE CASCADE,
                method TEXT NOT NULL,
                amount REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_payments_slip ON slip_payments(slip_id);

            -- Append-only audit trail
            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY,
                slip_id INTEGER NOT NULL REFERENCES slips(id) ON DELETE CASCADE,
                action TEXT NOT NULL,                     -- approved, rejected, corrected, escalated, noted
                details TEXT,
                moderator_id TEXT,                        -- NULL = System
                from_status TEXT,
                to_status TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_activity_slip ON activity_log(slip_id);
            CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_log(created_at);
            "#,
        )?;

        info!(path = %self.db_path, "Database schema initialized");
        Ok(())
    }
}
