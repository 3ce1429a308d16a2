//! Logging infrastructure for tether
//!
//! Two concerns live here:
//! - process logging: `tracing` subscriber initialisation driven by
//!   [`tether_config::LoggingConfig`]
//! - the execution logger: a bounded, insertion-ordered store of
//!   per-request traces (captured script log lines and database
//!   operations) consumed by the admin surface

pub mod event;
pub mod init;
pub mod request_log;

pub use event::{DatabaseOperation, LogEntry, LogLevel};
pub use init::{init_logging_from_config, init_simple_tracing};
pub use request_log::{
    generate_request_id, LogQuery, RequestLog, RequestLogStats, RequestLogger, RequestSnapshot,
};
