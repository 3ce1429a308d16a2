//! System tables created at startup

use crate::error::{StorageError, StorageResult};
use sqlx::SqlitePool;
use tracing::debug;

/// Bookkeeping tables; user tables are created by scripts themselves
const STATEMENTS: &[(&str, &str)] = &[
    (
        "executions",
        "CREATE TABLE IF NOT EXISTS executions (
            id          TEXT PRIMARY KEY,
            session_id  TEXT,
            code        TEXT NOT NULL,
            result      TEXT,
            console_log TEXT NOT NULL DEFAULT '[]',
            error       TEXT,
            source      TEXT NOT NULL,
            created_at  TEXT NOT NULL
        )",
    ),
    (
        "executions_session_idx",
        "CREATE INDEX IF NOT EXISTS executions_session_idx
            ON executions (session_id, created_at)",
    ),
    (
        "script_state",
        "CREATE TABLE IF NOT EXISTS script_state (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    ),
];

/// Create the system tables if they do not exist yet
pub async fn migrate(pool: &SqlitePool) -> StorageResult<()> {
    for (name, sql) in STATEMENTS {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(format!("{name}: {e}")))?;
        debug!("Applied schema statement: {}", name);
    }
    Ok(())
}
