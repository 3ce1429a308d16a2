//! Domain-driven configuration management for tether
//!
//! Configuration is split by functional domain (engine, database, outbound
//! HTTP, logging, server), each with its own defaults and validation.
//! Values come from a YAML file and can be overridden with `TETHER_*`
//! environment variables.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

pub use domains::{
    database::DatabaseConfig,
    engine::EngineConfig,
    http::HttpConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    server::ServerConfig,
    TetherConfig,
};
pub use domains::utils::serde_duration;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;
