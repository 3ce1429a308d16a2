//! In-memory repositories for tests and database-less runs

use crate::error::StorageResult;
use crate::execution::{ExecutionRecord, ExecutionRepository};
use crate::state::StateStore;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

#[derive(Default)]
pub struct MemoryExecutionRepository {
    records: RwLock<Vec<ExecutionRecord>>,
}

impl MemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExecutionRepository for MemoryExecutionRepository {
    async fn save(&self, record: &ExecutionRecord) -> StorageResult<()> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    async fn find_by_session(&self, session_id: &str) -> StorageResult<Vec<ExecutionRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|r| r.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> StorageResult<Vec<ExecutionRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    values: RwLock<BTreeMap<String, JsonValue>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `values`
    pub fn with_values(values: BTreeMap<String, JsonValue>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_all(&self) -> StorageResult<BTreeMap<String, JsonValue>> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn put(&self, key: &str, value: &JsonValue) -> StorageResult<()> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}
