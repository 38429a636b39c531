//! Configuration for the ptcp syslog receiver
//!
//! Loads TOML configuration describing process-wide settings, logging, and
//! one or more plain TCP servers.
//!
//! # Example
//!
//! ```toml
//! [global]
//! worker_threads = 4
//! disable_dns = true
//!
//! [log]
//! level = "info"
//!
//! [[servers]]
//! port = 10514
//! input_name = "remote"
//! notify_on_close = true
//!
//! [[servers]]
//! address = "127.0.0.1"
//! port = 10601
//! octet_counting = false
//! ```

pub mod error;
pub mod global;
pub mod logging;
pub mod servers;
pub mod validation;

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

pub use error::{ConfigError, Result};
pub use global::{GlobalConfig, MultiplexerType};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use servers::{DEFAULT_PORT, KeepaliveSettings, RateLimitSettings, TcpServerConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process-wide settings
    pub global: GlobalConfig,

    /// Receiver diagnostics
    pub log: LogConfig,

    /// Listening servers, in start order
    pub servers: Vec<TcpServerConfig>,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Servers that should be started
    pub fn enabled_servers(&self) -> impl Iterator<Item = &TcpServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: Config = "[[servers]]".parse().unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].port, "514");
        assert_eq!(config.global.worker_threads, 2);
        assert_eq!(config.log.level, LogLevel::Info);
    }

    #[test]
    fn test_empty_config_has_no_servers() {
        let result: Result<Config> = "".parse();
        assert!(matches!(result, Err(ConfigError::NoServersEnabled)));
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
[global]
max_message_size = 16384
worker_threads = 4
disable_dns = true
poll_interval = "250ms"
multiplexer = "poll"

[log]
level = "debug"
format = "json"

[[servers]]
port = 10514
input_name = "remote"
notify_on_close = true

[[servers]]
address = "127.0.0.1"
port = "10601"
octet_counting = false

[[servers]]
enabled = false
port = 10514
"#;
        let config: Config = toml.parse().unwrap();
        assert_eq!(config.global.max_message_size, 16384);
        assert_eq!(config.global.poll_interval, Duration::from_millis(250));
        assert_eq!(config.global.multiplexer, MultiplexerType::Poll);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.servers.len(), 3);

        let enabled: Vec<_> = config.enabled_servers().collect();
        assert_eq!(enabled.len(), 2);
        assert_eq!(enabled[0].input_name, "remote");
        assert!(enabled[0].notify_on_close);
        assert_eq!(enabled[1].address.as_deref(), Some("127.0.0.1"));
        assert!(!enabled[1].octet_counting);
    }

    #[test]
    fn test_parse_error() {
        let result: Result<Config> = "[[servers]\nport = ".parse();
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[servers]]\nport = 10514\ninput_name = \"file\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.servers[0].input_name, "file");
        assert_eq!(config.servers[0].effective_port(), Some(10514));
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
        assert!(err.to_string().contains("missing.toml"));
    }
}
