//! Seam between the dispatcher and the embedded interpreter

use crate::bridge::{BridgeRequest, ResponseHandle};
use crate::error::ExecutionError;
use crate::registry::{HandlerInfo, Registry};
use crate::scope::JobScope;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tether_config::EngineConfig;
use tether_logging::RequestLogger;
use tokio::runtime::Handle;

/// An interpreter the dispatcher can drive
///
/// Implementations live on the dispatcher thread for their whole life and
/// are never shared, so they do not need to be `Send`.
pub trait ScriptRuntime {
    /// Evaluate raw code and export its completion value
    fn eval(&mut self, code: &str, scope: &JobScope) -> Result<Option<JsonValue>, ExecutionError>;

    /// Invoke a registered handler as `handler(request, response)`
    fn call_handler(
        &mut self,
        info: &HandlerInfo,
        request: &BridgeRequest,
        response: &ResponseHandle,
        scope: &JobScope,
    ) -> Result<(), ExecutionError>;
}

/// Shared services handed to the runtime factory on the dispatcher thread
#[derive(Clone)]
pub struct RuntimeContext {
    pub registry: Arc<Registry>,
    pub logger: Arc<RequestLogger>,
    pub config: EngineConfig,
    /// Handle for driving async I/O from synchronous host functions
    pub handle: Handle,
}
