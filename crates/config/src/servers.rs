//! Server configuration
//!
//! One `[[servers]]` table per listening endpoint.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

/// Default listen port when none (or "0") is configured
pub const DEFAULT_PORT: u16 = 514;

/// TCP keepalive settings, unset fields keep the OS defaults
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeepaliveSettings {
    /// Enable SO_KEEPALIVE on accepted sessions
    pub enabled: bool,

    /// Unanswered probes before the connection is dropped
    pub probes: Option<u32>,

    /// Idle time before the first probe
    #[serde(with = "humantime_serde")]
    pub time: Option<Duration>,

    /// Interval between probes
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,
}

/// Per-server message rate limit
///
/// An interval of zero disables limiting.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Window length
    /// Default: 0s (unlimited)
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Messages allowed per window
    /// Default: 10000
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            burst: 10_000,
        }
    }
}

/// Plain TCP syslog server
///
/// # Example
///
/// ```toml
/// [[servers]]
/// address = "0.0.0.0"
/// port = 10514
/// input_name = "remote"
/// ruleset = "network"
/// octet_counting = true
/// notify_on_close = true
///
/// [servers.keepalive]
/// enabled = true
/// time = "60s"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpServerConfig {
    /// Whether this server is started
    pub enabled: bool,

    /// Bind address; unset, "" or "*" listens on all interfaces
    pub address: Option<String>,

    /// Listen port, given as a number or a string ("0" or "" = 514)
    #[serde(deserialize_with = "port_string")]
    pub port: String,

    /// Input name stamped on every message
    /// Default: "imptcp"
    pub input_name: String,

    /// Ruleset messages are bound to
    /// Default: "default"
    pub ruleset: String,

    /// Accept octet-counted frames as well as newline-stuffed ones
    /// Default: true
    pub octet_counting: bool,

    /// Extra byte (0-255) terminating stuffed frames
    pub additional_frame_delimiter: Option<u8>,

    /// Stop treating LF as a frame terminator; requires an additional delimiter
    pub disable_lf_delimiter: bool,

    /// Drop the remainder of oversize stuffed frames instead of splitting them
    pub discard_truncated: bool,

    /// Skip a leading space before a frame
    pub sp_framing_fix: bool,

    /// Only end a stuffed frame at a delimiter followed by `<`
    pub multi_line: bool,

    /// Largest octet count accepted before a frame is rejected
    /// Default: 200000000
    pub max_frame_size: usize,

    /// Log a notice when the remote peer closes
    pub notify_on_close: bool,

    /// Log a notice when a connection is established
    pub notify_on_open: bool,

    /// Concurrent sessions; further connections are dropped at accept
    /// Default: 200
    pub max_sessions: usize,

    /// Reads per session before other sockets get a turn (0 = unlimited)
    /// Default: 500
    pub starvation_max_reads: usize,

    /// Listen backlog
    /// Default: 511
    pub backlog: i32,

    /// Keepalive on accepted sessions
    pub keepalive: KeepaliveSettings,

    /// Rate limiting of submitted messages
    pub rate_limit: RateLimitSettings,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: None,
            port: DEFAULT_PORT.to_string(),
            input_name: "imptcp".into(),
            ruleset: "default".into(),
            octet_counting: true,
            additional_frame_delimiter: None,
            disable_lf_delimiter: false,
            discard_truncated: false,
            sp_framing_fix: false,
            multi_line: false,
            max_frame_size: 200_000_000,
            notify_on_close: false,
            notify_on_open: false,
            max_sessions: 200,
            starvation_max_reads: 500,
            backlog: 511,
            keepalive: KeepaliveSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl TcpServerConfig {
    /// Port actually bound, or None when the configured value is not a port
    pub fn effective_port(&self) -> Option<u16> {
        match self.port.trim() {
            "" | "0" => Some(DEFAULT_PORT),
            port => port.parse().ok(),
        }
    }

    /// Address key used for duplicate detection ("*" for wildcard)
    pub fn address_key(&self) -> &str {
        match self.address.as_deref().map(str::trim) {
            None | Some("") | Some("*") => "*",
            Some(addr) => addr.trim_start_matches('[').trim_end_matches(']'),
        }
    }
}

fn port_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct PortVisitor;

    impl Visitor<'_> for PortVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a port number or string")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(PortVisitor)
}
