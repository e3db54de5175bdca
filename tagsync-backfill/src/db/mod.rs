//! Database access for tagsync-backfill
//!
//! SQLite-backed implementation of the Local Store.

pub mod kv_store;

pub use kv_store::SqliteStore;

use sqlx::SqlitePool;
use std::path::Path;
use tagsync_common::Result;

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "tagsync.db";

/// Initialize database connection pool
///
/// Creates the parent directory and the database file if missing, then the
/// tables this crate needs.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (kv_store)");

    Ok(())
}
