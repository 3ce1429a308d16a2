//! Execution logger: bounded store of per-request traces
//!
//! Every HTTP-triggered job (and every raw-code execution) gets one
//! [`RequestLog`] record. While the job runs, script log lines and database
//! operations are appended to it; when the job completes the record is
//! stamped with its status and frozen.
//!
//! The store holds at most `capacity` records. Eviction is by insertion
//! order: reads never refresh a record, so once the store is full the
//! oldest *inserted* record is the one dropped.

use crate::event::{DatabaseOperation, LogEntry, LogLevel};
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

/// Captured response bodies are truncated to this many bytes
const MAX_CAPTURED_BODY: usize = 64 * 1024;

/// Generate a unique, time-ordered request id
///
/// UUIDv7 carries a millisecond timestamp prefix followed by random bits,
/// so ids sort by creation time and collisions are negligible.
pub fn generate_request_id() -> String {
    Uuid::now_v7().to_string()
}

/// What the request looked like when it arrived
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    /// Which surface submitted the work (`http`, `api`, `mcp`, `file`, ...)
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Caller-supplied `X-Request-ID`, when the request carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Trace of one request or execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLog {
    pub id: String,
    pub request: RequestSnapshot,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
    pub database_operations: Vec<DatabaseOperation>,
}

impl RequestLog {
    fn new(id: String, request: RequestSnapshot) -> Self {
        Self {
            id,
            request,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            status: None,
            response_body: None,
            error: None,
            logs: Vec::new(),
            database_operations: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// `2xx`, `4xx`, ... or `pending` while in flight
    pub fn status_class(&self) -> String {
        match (self.status, self.is_finished()) {
            (Some(status), _) => format!("{}xx", status / 100),
            (None, true) if self.error.is_some() => "error".to_string(),
            (None, true) => "none".to_string(),
            (None, false) => "pending".to_string(),
        }
    }

    fn matches(&self, query: &LogQuery) -> bool {
        if let Some(session_id) = &query.session_id {
            if self.request.session_id.as_deref() != Some(session_id.as_str()) {
                return false;
            }
        }

        if let Some(source) = &query.source {
            if !self.request.source.eq_ignore_ascii_case(source) {
                return false;
            }
        }

        if let Some(method) = &query.method {
            if !self.request.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }

        if let Some(class) = &query.status_class {
            if !self.status_class().eq_ignore_ascii_case(class) {
                return false;
            }
        }

        match &query.search {
            Some(search) if !search.is_empty() => self.contains_text(&search.to_lowercase()),
            _ => true,
        }
    }

    /// Case-insensitive substring search over the interesting text fields
    fn contains_text(&self, needle: &str) -> bool {
        let hit = |haystack: &str| haystack.to_lowercase().contains(needle);

        hit(&self.id)
            || self.request.correlation_id.as_deref().is_some_and(hit)
            || hit(&self.request.method)
            || hit(&self.request.path)
            || self.request.body.as_deref().is_some_and(hit)
            || self.response_body.as_deref().is_some_and(hit)
            || self.error.as_deref().is_some_and(hit)
            || self.logs.iter().any(|entry| hit(&entry.message))
            || self.database_operations.iter().any(|op| hit(&op.sql))
    }
}

/// Filter for [`RequestLogger::list`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub search: Option<String>,
    pub session_id: Option<String>,
    pub source: Option<String>,
    pub method: Option<String>,
    /// `2xx`, `5xx`, `pending`, ...
    pub status_class: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Aggregated view over the stored records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogStats {
    pub total: usize,
    pub in_flight: usize,
    pub errors: usize,
    pub by_status_class: BTreeMap<String, usize>,
    pub by_method: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_duration_ms: Option<f64>,
}

/// Thread-safe, capacity-bounded store of [`RequestLog`] records
pub struct RequestLogger {
    entries: RwLock<LruCache<String, RequestLog>>,
}

impl RequestLogger {
    /// Create a logger keeping at most `capacity` records (minimum one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.read().cap().get()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Open a record for an arriving request and return its id
    pub fn start(&self, request: RequestSnapshot) -> String {
        let id = generate_request_id();
        let record = RequestLog::new(id.clone(), request);

        if let Some((evicted, _)) = self.write().push(id.clone(), record) {
            debug!(request_id = %evicted, "Evicted oldest request log entry");
        }

        id
    }

    /// Append a log line; ignored once the record is finished or evicted
    pub fn add_log(
        &self,
        id: &str,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<JsonValue>,
    ) {
        let mut entry = LogEntry::new(level, message);
        entry.data = data;

        self.update(id, |record| record.logs.push(entry));
    }

    /// Append a database operation; ignored once the record is finished or evicted
    pub fn add_database_operation(&self, id: &str, operation: DatabaseOperation) {
        self.update(id, |record| record.database_operations.push(operation));
    }

    /// Stamp the end of the request and freeze the record
    ///
    /// Returns `false` when the record is unknown or was already finished;
    /// only the first call per id has any effect.
    pub fn finish(
        &self,
        id: &str,
        status: Option<u16>,
        response_body: Option<String>,
        error: Option<String>,
    ) -> bool {
        self.update(id, |record| {
            let finished_at = Utc::now();
            let elapsed = finished_at - record.started_at;
            record.duration_ms = Some(elapsed.num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0);
            record.finished_at = Some(finished_at);
            record.status = status;
            record.response_body = response_body.map(truncate_body);
            record.error = error;
        })
    }

    /// Copy of one record
    pub fn get(&self, id: &str) -> Option<RequestLog> {
        self.read().peek(id).cloned()
    }

    /// Newest record whose request carried `correlation_id`
    pub fn find_by_correlation(&self, correlation_id: &str) -> Option<RequestLog> {
        self.read()
            .iter()
            .map(|(_, record)| record)
            .find(|record| record.request.correlation_id.as_deref() == Some(correlation_id))
            .cloned()
    }

    /// Records matching `query`, newest first
    pub fn list(&self, query: &LogQuery) -> Vec<RequestLog> {
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        self.snapshot()
            .into_iter()
            .filter(|record| record.matches(query))
            .skip(offset)
            .take(limit)
            .collect()
    }

    /// Aggregate counts by status class and method
    pub fn stats(&self) -> RequestLogStats {
        let records = self.snapshot();
        let mut stats = RequestLogStats {
            total: records.len(),
            ..Default::default()
        };

        let mut duration_total = 0.0;
        let mut duration_count = 0usize;

        for record in &records {
            if !record.is_finished() {
                stats.in_flight += 1;
            }
            if record.error.is_some() || record.status.is_some_and(|s| s >= 500) {
                stats.errors += 1;
            }
            if let Some(duration) = record.duration_ms {
                duration_total += duration;
                duration_count += 1;
            }

            *stats.by_status_class.entry(record.status_class()).or_default() += 1;
            *stats
                .by_method
                .entry(record.request.method.to_uppercase())
                .or_default() += 1;
        }

        if duration_count > 0 {
            stats.average_duration_ms = Some(duration_total / duration_count as f64);
        }

        stats
    }

    /// Drop every record
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Point-in-time copy, newest first, so scans never hold the lock
    fn snapshot(&self) -> Vec<RequestLog> {
        self.read().iter().map(|(_, record)| record.clone()).collect()
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut RequestLog)) -> bool {
        let mut entries = self.write();
        match entries.peek_mut(id) {
            Some(record) if !record.is_finished() => {
                apply(record);
                true
            }
            _ => false,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LruCache<String, RequestLog>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LruCache<String, RequestLog>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new(1000)
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_CAPTURED_BODY {
        let mut cut = MAX_CAPTURED_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("…[truncated]");
    }
    body
}
