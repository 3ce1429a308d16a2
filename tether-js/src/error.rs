use tether_runtime::ExecutionError;
use tether_storage::StorageError;
use thiserror::Error;

/// JavaScript execution errors
#[derive(Error, Debug)]
pub enum JsExecutionError {
    /// Uncaught exception, compile error or rejected promise
    #[error("{0}")]
    Script(String),

    #[error("Value conversion error: {0}")]
    Conversion(String),

    #[error("Failed to install bindings: {0}")]
    Binding(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<JsExecutionError> for ExecutionError {
    fn from(error: JsExecutionError) -> Self {
        match error {
            JsExecutionError::Script(message) => ExecutionError::Script(message),
            JsExecutionError::Binding(message) => ExecutionError::Init(message),
            other => ExecutionError::Script(other.to_string()),
        }
    }
}
