//! Tether runtime core
//!
//! Makes one single-threaded script interpreter serve concurrent traffic:
//! every job goes through a bounded queue to a single dispatcher thread that
//! owns the interpreter, while route lookup and execution tracing are served
//! from their own locks.
//!
//! The interpreter itself plugs in through [`ScriptRuntime`].

pub mod bridge;
mod dispatcher;
pub mod engine;
pub mod error;
pub mod job;
pub mod registry;
pub mod scope;
pub mod script;

pub use bridge::{
    BridgeRequest, BridgeResponse, ChannelWriter, CommittedResponse, CookieOptions,
    NativeRequest, NativeResponse, Payload, ResponseHandle, ResponseWriter,
};
pub use dispatcher::{DispatcherSnapshot, DispatcherStats};
pub use engine::{Engine, EngineBuilder, StartupReport};
pub use error::{EngineError, ExecutionError};
pub use job::{Done, EvalResult, HttpExchange, Job, JobSource, JobWork};
pub use registry::{HandlerInfo, HandlerRef, Registry, RouteMatch, ANY_METHOD};
pub use scope::JobScope;
pub use script::{RuntimeContext, ScriptRuntime};
