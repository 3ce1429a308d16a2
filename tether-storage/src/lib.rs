//! Storage layer for tether
//!
//! One SQLite pool serves three consumers:
//! - scripts, through the `db.query` / `db.exec` bindings ([`Database`])
//! - the execution history of raw-code jobs ([`ExecutionRepository`])
//! - the persisted global `state` object ([`StateStore`])
//!
//! In-memory implementations of both repository traits live in [`memory`]
//! for tests and for running without a database file.

pub mod database;
pub mod error;
pub mod execution;
pub mod memory;
pub mod schema;
pub mod state;

pub use database::{Database, ExecResult};
pub use error::{StorageError, StorageResult};
pub use execution::{ExecutionRecord, ExecutionRepository, SqliteExecutionRepository};
pub use memory::{MemoryExecutionRepository, MemoryStateStore};
pub use state::{SqliteStateStore, StateStore};
