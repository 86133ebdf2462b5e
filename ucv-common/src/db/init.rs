//! Database initialization
//!
//! Opens (or creates) the SQLite database in the root folder and applies the
//! schema idempotently. Safe to call on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Per-connection busy timeout; longer waits are handled by the caller's lock retry
pub const BUSY_TIMEOUT_MS: u64 = 250;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL lets the HTTP handlers read while pipeline tasks write
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// One connection only: every new SQLite memory connection is a separate database.
pub async fn init_in_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(SqliteConnectOptions::new().in_memory(true).foreign_keys(true))
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Apply all tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_consumption_entries_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the consumption entries table
///
/// One row per submitted bill: declared values, extracted values, integrity
/// fields and the verification outcome. JSON payloads are stored as TEXT.
/// An owner can hold each content hash once.
pub async fn create_consumption_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consumption_entries (
            entry_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            data_source TEXT NOT NULL,
            billing_amount REAL,
            billing_date TEXT,
            units_consumed REAL,
            due_date TEXT,
            biller_name TEXT,
            biller_category TEXT,
            bill_number TEXT,
            consumer_number TEXT,
            extraction_confidence REAL,
            extraction_raw TEXT,
            content_hash TEXT NOT NULL,
            document_url TEXT,
            file_mime_type TEXT,
            file_size INTEGER,
            is_imputed INTEGER NOT NULL DEFAULT 0,
            is_tampered INTEGER NOT NULL DEFAULT 0,
            tamper_reasons TEXT NOT NULL DEFAULT '[]',
            tamper_reason TEXT,
            verification_status TEXT NOT NULL DEFAULT 'PENDING',
            verification_source TEXT NOT NULL DEFAULT 'NONE',
            verification_confidence REAL NOT NULL DEFAULT 0,
            verified_by TEXT,
            verifier_response TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index_sql in [
        "CREATE INDEX IF NOT EXISTS idx_consumption_owner_date ON consumption_entries(owner_id, billing_date)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_consumption_owner_hash ON consumption_entries(owner_id, content_hash)",
        "CREATE INDEX IF NOT EXISTS idx_consumption_status ON consumption_entries(verification_status)",
        "CREATE INDEX IF NOT EXISTS idx_consumption_source ON consumption_entries(data_source)",
        "CREATE INDEX IF NOT EXISTS idx_consumption_tampered ON consumption_entries(is_tampered)",
    ] {
        sqlx::query(index_sql).execute(pool).await?;
    }

    Ok(())
}
