//! Script engine configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Dispatcher and interpreter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the bounded job queue; submitters wait when it is full
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of request records kept by the execution logger
    #[serde(default = "default_request_log_capacity")]
    pub request_log_capacity: usize,

    /// How long startup script loading waits before moving on
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_startup_timeout"
    )]
    pub startup_timeout: Duration,

    /// Scripts evaluated once when the engine starts
    #[serde(default)]
    pub startup_scripts: Vec<PathBuf>,

    /// Upper bound on loop iterations per evaluation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_iteration_limit: Option<u64>,

    /// Upper bound on call stack depth
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursion_limit: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            request_log_capacity: default_request_log_capacity(),
            startup_timeout: default_startup_timeout(),
            startup_scripts: Vec::new(),
            loop_iteration_limit: None,
            recursion_limit: None,
        }
    }
}

impl Validatable for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.queue_capacity, "queue_capacity", self.domain_name())?;
        validate_positive(
            self.request_log_capacity,
            "request_log_capacity",
            self.domain_name(),
        )?;
        validate_positive(
            self.startup_timeout.as_secs(),
            "startup_timeout",
            self.domain_name(),
        )?;

        if let Some(limit) = self.loop_iteration_limit {
            validate_positive(limit, "loop_iteration_limit", self.domain_name())?;
        }
        if let Some(limit) = self.recursion_limit {
            validate_positive(limit, "recursion_limit", self.domain_name())?;
        }

        for script in &self.startup_scripts {
            if script.as_os_str().is_empty() {
                return Err(self.validation_error("startup_scripts cannot contain empty paths"));
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "engine"
    }
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_request_log_capacity() -> usize {
    1000
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(30)
}
