//! Global configuration settings
//!
//! Process-wide settings shared by every server.

use std::time::Duration;

use serde::Deserialize;

/// Readiness facility preference
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MultiplexerType {
    /// epoll/kqueue, falls back to poll when unavailable (default)
    #[default]
    Epoll,
    /// poll(2)
    Poll,
}

/// Global configuration
///
/// # Example
///
/// ```toml
/// [global]
/// max_message_size = 8096
/// worker_threads = 2
/// disable_dns = false
/// poll_interval = "500ms"
/// multiplexer = "epoll"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Largest message kept per frame (bytes)
    /// Default: 8096
    pub max_message_size: usize,

    /// Worker threads processing ready sockets
    /// Default: 2 (0 or 1 = everything on the dispatcher thread, capped at 16)
    pub worker_threads: usize,

    /// Skip reverse DNS for peers; hostnames are the peer IP
    /// Default: false
    pub disable_dns: bool,

    /// Longest single readiness wait; bounds shutdown latency
    /// Default: 500ms
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Preferred readiness facility
    /// Default: epoll
    pub multiplexer: MultiplexerType,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_message_size: 8096,
            worker_threads: 2,
            disable_dns: false,
            poll_interval: Duration::from_millis(500),
            multiplexer: MultiplexerType::Epoll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.max_message_size, 8096);
        assert_eq!(config.worker_threads, 2);
        assert!(!config.disable_dns);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.multiplexer, MultiplexerType::Epoll);
    }

    #[test]
    fn test_deserialize_empty() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_message_size, 8096);
        assert_eq!(config.worker_threads, 2);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
max_message_size = 65536
worker_threads = 8
disable_dns = true
poll_interval = "2s"
multiplexer = "poll"
"#;
        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_message_size, 65536);
        assert_eq!(config.worker_threads, 8);
        assert!(config.disable_dns);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.multiplexer, MultiplexerType::Poll);
    }

    #[test]
    fn test_deserialize_unknown_multiplexer() {
        let result: Result<GlobalConfig, _> = toml::from_str("multiplexer = \"select\"");
        assert!(result.is_err());
    }
}
