//! Domain-specific configuration modules

pub mod database;
pub mod engine;
pub mod http;
pub mod logging;
pub mod server;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main tether configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TetherConfig {
    /// Dispatcher, job queue and request log configuration
    #[serde(default)]
    pub engine: engine::EngineConfig,

    /// Relational store used by scripts and for bookkeeping
    #[serde(default)]
    pub database: database::DatabaseConfig,

    /// Outbound HTTP client configuration
    #[serde(default)]
    pub http: http::HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: server::ServerConfig,
}

impl TetherConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.database.validate()?;
        self.http.validate()?;
        self.logging.validate()?;
        self.server.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = TetherConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
