//! Per-job context visible to script bindings

use crate::job::JobSource;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, PoisonError};
use tether_logging::{DatabaseOperation, LogEntry, LogLevel, RequestLogger};
use tracing::{debug, error, info, warn};

/// Where console output and database traces of the running job go
///
/// Console lines are captured for the job's result, mirrored into tracing
/// under the `tether::script` target and, when the job has an execution
/// logger entry, appended to it.
#[derive(Clone)]
pub struct JobScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    request_id: Option<String>,
    session_id: Option<String>,
    source: JobSource,
    logger: Arc<RequestLogger>,
    console: Mutex<Vec<LogEntry>>,
}

impl JobScope {
    pub fn new(
        request_id: Option<String>,
        session_id: Option<String>,
        source: JobSource,
        logger: Arc<RequestLogger>,
    ) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                request_id,
                session_id,
                source,
                logger,
                console: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Scope with no execution logger entry
    pub fn detached(source: JobSource) -> Self {
        Self::new(None, None, source, Arc::new(RequestLogger::new(1)))
    }

    pub fn request_id(&self) -> Option<&str> {
        self.inner.request_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.inner.session_id.as_deref()
    }

    pub fn source(&self) -> JobSource {
        self.inner.source
    }

    pub fn console(&self, level: LogLevel, message: impl Into<String>, data: Option<JsonValue>) {
        let message = message.into();
        let request_id = self.request_id().unwrap_or("-");

        match level {
            LogLevel::Debug => debug!(target: "tether::script", request_id, "{}", message),
            LogLevel::Log | LogLevel::Info => {
                info!(target: "tether::script", request_id, "{}", message)
            }
            LogLevel::Warn => warn!(target: "tether::script", request_id, "{}", message),
            LogLevel::Error => error!(target: "tether::script", request_id, "{}", message),
        }

        if let Some(id) = &self.inner.request_id {
            self.inner
                .logger
                .add_log(id, level, message.clone(), data.clone());
        }

        let mut entry = LogEntry::new(level, message);
        entry.data = data;
        self.inner
            .console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn record_database_operation(&self, operation: DatabaseOperation) {
        if let Some(id) = &self.inner.request_id {
            self.inner.logger.add_database_operation(id, operation);
        }
    }

    /// Captured console lines so far
    pub fn console_lines(&self) -> Vec<LogEntry> {
        self.inner
            .console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn take_console(&self) -> Vec<LogEntry> {
        std::mem::take(
            &mut *self
                .inner
                .console
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}
