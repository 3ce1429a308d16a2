//! Error types for the engine and for individual jobs

use std::time::Duration;
use thiserror::Error;

/// Failure of a single job
///
/// Reported through the job's completion signal; never fatal to the
/// dispatcher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// Compile error, uncaught exception or rejected promise
    #[error("{0}")]
    Script(String),

    /// Bad arguments to a registration call
    #[error("Registration error: {0}")]
    Registration(String),

    /// Host-level fault recovered at the dispatcher boundary
    #[error("Internal error: {0}")]
    Panic(String),

    /// The handler referenced by a job no longer exists in the interpreter
    #[error("Handler {0} is not bound")]
    HandlerNotFound(u64),

    /// Failure while building the interpreter
    #[error("Runtime initialisation failed: {0}")]
    Init(String),
}

/// Failure talking to the engine itself
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Job queue is full")]
    QueueFull,

    #[error("Job queue is closed")]
    QueueClosed,

    /// The dispatcher dropped a job's completion channel without answering
    #[error("Dispatcher stopped before completing the job")]
    DispatcherGone,

    #[error("Timed out after {0:?}; the job keeps running in the background")]
    Timeout(Duration),

    #[error("Engine requires a Tokio runtime")]
    NoRuntime,

    #[error("Failed to start dispatcher: {0}")]
    Startup(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
