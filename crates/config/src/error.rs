//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error - two servers bind the same address and port
    #[error("{address}:{port} is used by multiple servers: {servers}")]
    DuplicatePort {
        /// Bind address ("*" for wildcard)
        address: String,
        /// The conflicting port
        port: u16,
        /// Servers using this endpoint
        servers: String,
    },

    /// Validation error - required field missing
    #[error("{component} '{name}' is missing required field '{field}'")]
    MissingField {
        /// Component type (e.g., "server")
        component: &'static str,
        /// Name of the component
        name: String,
        /// Missing field name
        field: &'static str,
    },

    /// Validation error - invalid value
    #[error("{component} '{name}' has invalid {field}: {message}")]
    InvalidValue {
        /// Component type
        component: &'static str,
        /// Name of the component
        name: String,
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },

    /// No servers enabled
    #[error("no servers are enabled - at least one server must be enabled")]
    NoServersEnabled,
}

impl ConfigError {
    /// Create a DuplicatePort error
    pub fn duplicate_port(address: impl Into<String>, port: u16, servers: impl Into<String>) -> Self {
        Self::DuplicatePort {
            address: address.into(),
            port,
            servers: servers.into(),
        }
    }

    /// Create a MissingField error
    pub fn missing_field(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
    ) -> Self {
        Self::MissingField {
            component,
            name: name.into(),
            field,
        }
    }

    /// Create an InvalidValue error
    pub fn invalid_value(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            component,
            name: name.into(),
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_port_error() {
        let err = ConfigError::duplicate_port("*", 514, "imptcp, remote");
        assert!(err.to_string().contains("*:514"));
        assert!(err.to_string().contains("imptcp, remote"));
    }

    #[test]
    fn test_missing_field_error() {
        let err = ConfigError::missing_field("server", "imptcp", "additional_frame_delimiter");
        assert!(err.to_string().contains("server"));
        assert!(err.to_string().contains("imptcp"));
        assert!(err.to_string().contains("additional_frame_delimiter"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::invalid_value("server", "imptcp", "port", "not a number");
        assert!(err.to_string().contains("imptcp"));
        assert!(err.to_string().contains("port"));
        assert!(err.to_string().contains("not a number"));
    }

    #[test]
    fn test_no_servers_enabled() {
        let err = ConfigError::NoServersEnabled;
        assert!(err.to_string().contains("no servers"));
    }
}
