//! Durable history of raw-code executions

use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

/// One executed code snippet; written once, never updated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub session_id: Option<String>,
    pub code: String,
    pub result: Option<JsonValue>,
    pub console_log: Vec<String>,
    pub error: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(code: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: None,
            code: code.into(),
            result: None,
            console_log: Vec::new(),
            error: None,
            source: source.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn save(&self, record: &ExecutionRecord) -> StorageResult<()>;

    /// Records of one session, oldest first
    async fn find_by_session(&self, session_id: &str) -> StorageResult<Vec<ExecutionRecord>>;

    /// Most recent records across all sessions, newest first
    async fn recent(&self, limit: usize) -> StorageResult<Vec<ExecutionRecord>>;
}

pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn save(&self, record: &ExecutionRecord) -> StorageResult<()> {
        let result = record.result.as_ref().map(serde_json::to_string).transpose()?;
        let console_log = serde_json::to_string(&record.console_log)?;

        sqlx::query(
            "INSERT INTO executions (id, session_id, code, result, console_log, error, source, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.session_id)
        .bind(&record.code)
        .bind(result)
        .bind(console_log)
        .bind(&record.error)
        .bind(&record.source)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_session(&self, session_id: &str) -> StorageResult<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT id, session_id, code, result, console_log, error, source, created_at
             FROM executions WHERE session_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn recent(&self, limit: usize) -> StorageResult<Vec<ExecutionRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT id, session_id, code, result, console_log, error, source, created_at
             FROM executions ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> StorageResult<ExecutionRecord> {
    let result: Option<String> = row.try_get("result")?;
    let console_log: String = row.try_get("console_log")?;

    Ok(ExecutionRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        code: row.try_get("code")?,
        result: result.as_deref().map(serde_json::from_str).transpose()?,
        console_log: serde_json::from_str(&console_log)?,
        error: row.try_get("error")?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_find_by_session() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteExecutionRepository::new(db.pool().clone());

        let mut first = ExecutionRecord::new("1 + 1", "api").with_session(Some("s1".into()));
        first.result = Some(json!(2));
        first.console_log = vec!["[log] hi".into()];
        repo.save(&first).await.unwrap();

        let mut second = ExecutionRecord::new("throw 1", "mcp").with_session(Some("s1".into()));
        second.error = Some("Uncaught 1".into());
        repo.save(&second).await.unwrap();

        repo.save(&ExecutionRecord::new("other", "file")).await.unwrap();

        let found = repo.find_by_session("s1").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, first.id);
        assert_eq!(found[0].result, Some(json!(2)));
        assert_eq!(found[0].console_log, vec!["[log] hi".to_string()]);
        assert_eq!(found[1].error.as_deref(), Some("Uncaught 1"));
        assert_eq!(found[1].result, None);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_limited() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteExecutionRepository::new(db.pool().clone());

        let mut ids = Vec::new();
        for i in 0..5 {
            let record = ExecutionRecord::new(format!("{i}"), "api");
            ids.push(record.id.clone());
            repo.save(&record).await.unwrap();
        }

        let recent = repo.recent(3).await.unwrap();
        let recent_ids: Vec<_> = recent.iter().map(|r| r.id.clone()).collect();
        assert_eq!(recent_ids, vec![ids[4].clone(), ids[3].clone(), ids[2].clone()]);
    }
}
