//! The single worker that owns the interpreter
//!
//! Jobs are pulled from the bounded queue and run strictly one at a time.
//! Every job runs inside a panic boundary, always signals completion, and
//! HTTP jobs always produce exactly one reply.

use crate::bridge::{BridgeRequest, ResponseHandle};
use crate::error::ExecutionError;
use crate::job::{Done, EvalResult, HttpExchange, Job, JobSource, JobWork};
use crate::registry::{normalize_path, path_params, HandlerInfo};
use crate::scope::JobScope;
use crate::script::ScriptRuntime;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tether_logging::{LogLevel, RequestLogger, RequestSnapshot};
use tether_storage::{ExecutionRecord, ExecutionRepository};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Counters maintained by the dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    processed: AtomicU64,
    failed: AtomicU64,
    panics: AtomicU64,
    active: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub panics: u64,
    pub active: usize,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherSnapshot {
        DispatcherSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

/// Where raw-code executions are recorded
pub(crate) struct Persistence {
    pub repository: Arc<dyn ExecutionRepository>,
    pub handle: Handle,
}

pub(crate) struct Dispatcher<R> {
    runtime: R,
    logger: Arc<RequestLogger>,
    stats: Arc<DispatcherStats>,
    persistence: Option<Persistence>,
}

impl<R: ScriptRuntime> Dispatcher<R> {
    pub fn new(
        runtime: R,
        logger: Arc<RequestLogger>,
        stats: Arc<DispatcherStats>,
        persistence: Option<Persistence>,
    ) -> Self {
        Self {
            runtime,
            logger,
            stats,
            persistence,
        }
    }

    /// Pull loop; returns once every sender is gone and the queue is drained
    pub fn run(mut self, mut jobs: mpsc::Receiver<Job>) {
        info!("Dispatcher started");
        while let Some(job) = jobs.blocking_recv() {
            self.process(job);
        }
        info!("Dispatcher stopped");
    }

    pub fn process(&mut self, job: Job) {
        let Job {
            work,
            done,
            result,
            session_id,
            source,
        } = job;

        self.stats.active.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let (outcome, mut eval) = match work {
            JobWork::Code(code) => self.run_code(code, source, session_id),
            JobWork::Handler { info, exchange } => {
                self.run_handler(info, exchange, source, session_id)
            }
        };

        eval.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        if outcome.is_err() {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }

        // Callers may have stopped waiting
        if let Some(done) = done {
            let _ = done.send(outcome);
        }
        if let Some(result) = result {
            let _ = result.send(eval);
        }
    }

    fn run_code(
        &mut self,
        code: String,
        source: JobSource,
        session_id: Option<String>,
    ) -> (Done, EvalResult) {
        let request_id = self.logger.start(RequestSnapshot {
            method: "EXEC".to_string(),
            path: format!("/{source}"),
            body: Some(code.clone()),
            source: source.to_string(),
            session_id: session_id.clone(),
            ..Default::default()
        });
        let scope = JobScope::new(
            Some(request_id.clone()),
            session_id.clone(),
            source,
            self.logger.clone(),
        );

        debug!(request_id = %request_id, source = %source, "Executing code");

        let runtime = &mut self.runtime;
        let outcome = contain(&self.stats, || runtime.eval(&code, &scope));
        let console = scope.take_console();

        let (value, error) = match outcome {
            Ok(value) => (value, None),
            Err(err) => {
                debug!(request_id = %request_id, error = %err, "Code execution failed");
                (None, Some(err))
            }
        };

        self.logger.finish(
            &request_id,
            None,
            value.as_ref().map(JsonValue::to_string),
            error.as_ref().map(ToString::to_string),
        );

        if let Some(persistence) = &self.persistence {
            let mut record = ExecutionRecord::new(code, source.as_str()).with_session(session_id);
            record.result = value.clone();
            record.error = error.as_ref().map(ToString::to_string);
            record.console_log = console
                .iter()
                .map(|line| format!("[{}] {}", line.level, line.message))
                .collect();

            // Saved before completion is signalled, so callers observe the record
            if let Err(e) = persistence.handle.block_on(persistence.repository.save(&record)) {
                warn!("Failed to persist execution {}: {}", record.id, e);
            }
        }

        let eval = EvalResult {
            value,
            error: error.as_ref().map(ToString::to_string),
            console,
            duration_ms: 0.0,
            request_id: Some(request_id),
        };

        (error.map_or(Ok(()), Err), eval)
    }

    fn run_handler(
        &mut self,
        info: HandlerInfo,
        exchange: HttpExchange,
        source: JobSource,
        session_id: Option<String>,
    ) -> (Done, EvalResult) {
        let HttpExchange { request, writer } = exchange;

        let params = path_params(&info.pattern, &normalize_path(&request.path)).unwrap_or_default();
        let request = BridgeRequest::from_native(&request).with_params(params);

        let request_id = self
            .logger
            .start(request.snapshot(source.as_str(), session_id.clone()));
        let scope = JobScope::new(
            Some(request_id.clone()),
            session_id,
            source,
            self.logger.clone(),
        );
        let response = ResponseHandle::new(writer, info.content_type.clone());

        debug!(
            request_id = %request_id,
            handler = %info.handler,
            "Dispatching {} {}",
            request.method,
            request.path
        );

        let runtime = &mut self.runtime;
        let outcome = contain(&self.stats, || {
            runtime.call_handler(&info, &request, &response, &scope)
        });

        match &outcome {
            Ok(()) => {
                if response.with(|r| r.finish_default()) {
                    debug!(request_id = %request_id, "Handler returned without replying; sent default response");
                }
            }
            Err(err) => {
                self.logger
                    .add_log(&request_id, LogLevel::Error, err.to_string(), None);
                if response.with(|r| r.fail()) {
                    error!(request_id = %request_id, error = %err, "Handler failed");
                } else {
                    warn!(request_id = %request_id, error = %err, "Handler failed after the response was sent");
                }
            }
        }

        let committed = response.committed();
        let error = outcome.as_ref().err().map(ToString::to_string);
        self.logger.finish(
            &request_id,
            committed.as_ref().map(|c| c.status),
            committed.map(|c| c.body),
            error.clone(),
        );

        let eval = EvalResult {
            value: None,
            error,
            console: scope.take_console(),
            duration_ms: 0.0,
            request_id: Some(request_id),
        };

        (outcome, eval)
    }
}

/// Run `f` behind a panic boundary
fn contain<T>(
    stats: &DispatcherStats,
    f: impl FnOnce() -> Result<T, ExecutionError>,
) -> Result<T, ExecutionError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            stats.panics.fetch_add(1, Ordering::Relaxed);
            error!("Recovered from fault while running job: {}", message);
            Err(ExecutionError::Panic(message))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown fault".to_string()
    }
}
