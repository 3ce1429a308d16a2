//! Persistence for the script-visible `state` object

use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

/// Key/value store backing the global `state` object
///
/// The script runtime loads everything once when the interpreter is built
/// and then writes through on every mutation.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_all(&self) -> StorageResult<BTreeMap<String, JsonValue>>;

    async fn put(&self, key: &str, value: &JsonValue) -> StorageResult<()>;

    async fn remove(&self, key: &str) -> StorageResult<()>;

    async fn clear(&self) -> StorageResult<()>;
}

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load_all(&self) -> StorageResult<BTreeMap<String, JsonValue>> {
        let rows = sqlx::query("SELECT key, value FROM script_state")
            .fetch_all(&self.pool)
            .await?;

        let mut state = BTreeMap::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            state.insert(key, serde_json::from_str(&value)?);
        }
        Ok(state)
    }

    async fn put(&self, key: &str, value: &JsonValue) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO script_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM script_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM script_state")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_overwrites_and_remove_deletes() {
        let db = Database::in_memory().await.unwrap();
        let store = SqliteStateStore::new(db.pool().clone());

        store.put("counter", &json!(1)).await.unwrap();
        store.put("counter", &json!(2)).await.unwrap();
        store.put("config", &json!({"theme": "dark"})).await.unwrap();
        store.remove("missing").await.unwrap();

        let state = store.load_all().await.unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state["counter"], json!(2));
        assert_eq!(state["config"]["theme"], "dark");

        store.remove("counter").await.unwrap();
        assert!(!store.load_all().await.unwrap().contains_key("counter"));

        store.clear().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
