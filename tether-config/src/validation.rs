//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate that a database URL uses a supported scheme
pub fn validate_database_url(url: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(url, field_name, domain)?;

    if !url.starts_with("sqlite:") {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be a sqlite: URL, got '{}'", field_name, url),
        });
    }
    Ok(())
}

/// Validate that a bind address is a literal IP address or `localhost`
pub fn validate_bind_address(address: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(address, field_name, domain)?;

    if address == "localhost" {
        return Ok(());
    }

    // Reuse the URL host parser so both IPv4 and bracketed IPv6 are accepted
    let candidate = if address.contains(':') && !address.starts_with('[') {
        format!("http://[{}]", address)
    } else {
        format!("http://{}", address)
    };
    let parsed = url::Url::parse(&candidate)?;
    match parsed.host() {
        Some(url::Host::Ipv4(_)) | Some(url::Host::Ipv6(_)) => Ok(()),
        _ => Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be an IP address, got '{}'", field_name, address),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1u32, "n", "test").is_ok());
        assert!(validate_positive(0u32, "n", "test").is_err());
    }

    #[test]
    fn test_validate_database_url() {
        assert!(validate_database_url("sqlite::memory:", "url", "database").is_ok());
        assert!(validate_database_url("sqlite://tether.db", "url", "database").is_ok());
        assert!(validate_database_url("postgres://localhost/db", "url", "database").is_err());
        assert!(validate_database_url("", "url", "database").is_err());
    }

    #[test]
    fn test_validate_bind_address() {
        assert!(validate_bind_address("127.0.0.1", "bind_address", "server").is_ok());
        assert!(validate_bind_address("0.0.0.0", "bind_address", "server").is_ok());
        assert!(validate_bind_address("::1", "bind_address", "server").is_ok());
        assert!(validate_bind_address("localhost", "bind_address", "server").is_ok());
        assert!(validate_bind_address("example.com", "bind_address", "server").is_err());
    }
}
