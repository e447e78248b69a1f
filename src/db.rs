use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RagError, Result};

/// Opens the SQLite pool for the given database path.
///
/// WAL mode keeps concurrent readers unblocked while a single writer runs;
/// foreign keys are enabled so document deletion cascades through chunks,
/// closure edges, and both embedding tables.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            RagError::StoreUnavailable(format!(
                "cannot create database directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(|e| RagError::StoreUnavailable(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
