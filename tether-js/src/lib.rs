//! JavaScript runtime for tether, built on Boa
//!
//! [`JsRuntime`] implements [`tether_runtime::ScriptRuntime`]. It is created
//! on the dispatcher thread by [`JsRuntime::factory`] and never leaves it.

mod bindings;
pub mod conversion;
pub mod error;
mod host;
pub mod runtime;

pub use error::JsExecutionError;
pub use runtime::{start_engine, JsRuntime, JsServices};
