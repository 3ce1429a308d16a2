//! Relational store used by scripts and by the system tables

use crate::error::{StorageError, StorageResult};
use crate::schema;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use tether_config::DatabaseConfig;
use tracing::{debug, info};

/// Outcome of a statement that does not return rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: i64,
}

/// Pooled SQLite handle
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the pool described by `config` and bootstrap the system tables
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        info!("Connecting to database: {}", config.url);

        if !config.is_in_memory() {
            ensure_parent_dir(&config.url)?;
        }

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StorageError::ConfigError(format!("{}: {e}", config.url)))?
            .create_if_missing(true);

        // Every connection to `:memory:` is a separate database, so keep
        // exactly one and never let it be recycled
        let pool_options = if config.is_in_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(config.connection_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let database = Self { pool };
        database.migrate().await?;

        debug!("Database ready");
        Ok(database)
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect(&DatabaseConfig::in_memory()).await
    }

    pub async fn migrate(&self) -> StorageResult<()> {
        schema::migrate(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run a row-returning statement; each row becomes an object keyed by column name
    pub async fn query(&self, sql: &str, params: &[JsonValue]) -> StorageResult<Vec<JsonValue>> {
        let rows = bind_all(sqlx::query(sql), params)?
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_json).collect()
    }

    /// Run a statement for its side effects
    pub async fn exec(&self, sql: &str, params: &[JsonValue]) -> StorageResult<ExecResult> {
        let result = bind_all(sqlx::query(sql), params)?
            .execute(&self.pool)
            .await?;

        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_rowid(),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

enum BindValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// Array parameters are spread into consecutive placeholders
fn flatten_params(params: &[JsonValue]) -> StorageResult<Vec<BindValue>> {
    let mut values = Vec::with_capacity(params.len());
    for param in params {
        match param {
            JsonValue::Array(items) => {
                for item in items {
                    values.push(to_bind_value(item)?);
                }
            }
            other => values.push(to_bind_value(other)?),
        }
    }
    Ok(values)
}

fn to_bind_value(value: &JsonValue) -> StorageResult<BindValue> {
    Ok(match value {
        JsonValue::Null => BindValue::Null,
        JsonValue::Bool(b) => BindValue::Integer(i64::from(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                BindValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                BindValue::Real(f)
            } else {
                return Err(StorageError::InvalidParameter(n.to_string()));
            }
        }
        JsonValue::String(s) => BindValue::Text(s.clone()),
        nested @ (JsonValue::Array(_) | JsonValue::Object(_)) => {
            BindValue::Text(serde_json::to_string(nested)?)
        }
    })
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &[JsonValue]) -> StorageResult<SqliteQuery<'q>> {
    for value in flatten_params(params)? {
        query = match value {
            BindValue::Null => query.bind(Option::<i64>::None),
            BindValue::Integer(i) => query.bind(i),
            BindValue::Real(f) => query.bind(f),
            BindValue::Text(s) => query.bind(s),
        };
    }
    Ok(query)
}

fn row_to_json(row: &SqliteRow) -> StorageResult<JsonValue> {
    let mut object = Map::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            JsonValue::Null
        } else {
            // Storage class of this particular value, not the declared column type
            let type_info = raw.type_info().into_owned();
            match type_info.name() {
                "INTEGER" => JsonValue::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" => JsonValue::from(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                    JsonValue::String(BASE64.encode(bytes))
                }
                _ => JsonValue::String(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        object.insert(column.name().to_string(), value);
    }

    Ok(JsonValue::Object(object))
}

fn ensure_parent_dir(url: &str) -> StorageResult<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .ok_or_else(|| StorageError::ConfigError(format!("Invalid SQLite URL format: {url}")))?;
    let path = path.split('?').next().unwrap_or(path);

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            info!("Creating database directory: {:?}", parent);
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn db_with_users() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.exec(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL, avatar BLOB)",
            &[],
        )
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_exec_reports_rows_and_last_id() {
        let db = db_with_users().await;

        let first = db
            .exec("INSERT INTO users (name, score) VALUES (?, ?)", &[json!("ada"), json!(9.5)])
            .await
            .unwrap();
        assert_eq!(first, ExecResult { rows_affected: 1, last_insert_id: 1 });

        let second = db
            .exec("INSERT INTO users (name) VALUES (?)", &[json!("grace")])
            .await
            .unwrap();
        assert_eq!(second.last_insert_id, 2);

        let updated = db.exec("UPDATE users SET score = 1", &[]).await.unwrap();
        assert_eq!(updated.rows_affected, 2);
    }

    #[tokio::test]
    async fn test_query_maps_storage_classes() {
        let db = db_with_users().await;
        db.exec(
            "INSERT INTO users (name, score, avatar) VALUES (?, ?, X'DEADBEEF')",
            &[json!("ada"), json!(2.5)],
        )
        .await
        .unwrap();
        db.exec("INSERT INTO users (name) VALUES (NULL)", &[]).await.unwrap();

        let rows = db
            .query("SELECT id, name, score, avatar FROM users ORDER BY id", &[])
            .await
            .unwrap();

        assert_eq!(
            rows[0],
            json!({"id": 1, "name": "ada", "score": 2.5, "avatar": "3q2+7w=="})
        );
        assert_eq!(
            rows[1],
            json!({"id": 2, "name": null, "score": null, "avatar": null})
        );
    }

    #[tokio::test]
    async fn test_array_params_are_flattened() {
        let db = db_with_users().await;
        for name in ["a", "b", "c", "d"] {
            db.exec("INSERT INTO users (name) VALUES (?)", &[json!(name)])
                .await
                .unwrap();
        }

        let rows = db
            .query(
                "SELECT name FROM users WHERE id IN (?, ?, ?) AND name != ? ORDER BY id",
                &[json!([1, 2, 3]), json!("b")],
            )
            .await
            .unwrap();

        assert_eq!(rows, vec![json!({"name": "a"}), json!({"name": "c"})]);
    }

    #[tokio::test]
    async fn test_bools_and_objects_are_bound() {
        let db = Database::in_memory().await.unwrap();
        let rows = db
            .query("SELECT ? AS flag, ? AS doc", &[json!(true), json!({"k": [1]})])
            .await
            .unwrap();

        assert_eq!(rows[0]["flag"], json!(1));
        assert_eq!(rows[0]["doc"], json!(r#"{"k":[1]}"#));
    }

    #[tokio::test]
    async fn test_sql_error_is_query_error() {
        let db = Database::in_memory().await.unwrap();
        let err = db.query("SELECT * FROM missing_table", &[]).await.unwrap_err();
        assert!(err.is_query_error());
        assert!(err.to_string().contains("missing_table"));
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tether.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..Default::default()
        };

        let db = Database::connect(&config).await.unwrap();
        db.exec("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        db.close().await;

        assert!(path.exists());
    }
}
