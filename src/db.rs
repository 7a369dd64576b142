//! SQLite pool construction for the pipeline store.
//!
//! The database file lives wherever `[db] path` points; WAL mode keeps the
//! CLI responsive while a job holds a write transaction open.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::DbConfig;

/// Open (creating if needed) the SQLite database described by `db`.
pub async fn connect(db: &DbConfig) -> Result<SqlitePool> {
    if let Some(parent) = db.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create db directory: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db.path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(db.max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db.path.display()))?;

    Ok(pool)
}
