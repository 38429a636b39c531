//! Configuration validation
//!
//! Checks that a parsed configuration can actually be started.

use std::collections::HashMap;

use crate::error::{ConfigError, Result};
use crate::Config;

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.global.max_message_size == 0 {
        return Err(ConfigError::invalid_value(
            "global",
            "global",
            "max_message_size",
            "must be at least 1",
        ));
    }

    if config.enabled_servers().next().is_none() {
        return Err(ConfigError::NoServersEnabled);
    }

    validate_servers(config)?;
    validate_unique_endpoints(config)?;

    Ok(())
}

fn validate_servers(config: &Config) -> Result<()> {
    for server in config.enabled_servers() {
        let name = server.input_name.as_str();

        if server.effective_port().is_none() {
            return Err(ConfigError::invalid_value(
                "server",
                name,
                "port",
                format!("'{}' is not a valid port", server.port),
            ));
        }

        if server.max_frame_size == 0 {
            return Err(ConfigError::invalid_value(
                "server",
                name,
                "max_frame_size",
                "must be at least 1",
            ));
        }

        if server.max_sessions == 0 {
            return Err(ConfigError::invalid_value(
                "server",
                name,
                "max_sessions",
                "must be at least 1",
            ));
        }

        if server.backlog < 1 {
            return Err(ConfigError::invalid_value(
                "server",
                name,
                "backlog",
                "must be at least 1",
            ));
        }

        if server.disable_lf_delimiter && server.additional_frame_delimiter.is_none() {
            return Err(ConfigError::missing_field(
                "server",
                name,
                "additional_frame_delimiter",
            ));
        }

        if !server.rate_limit.interval.is_zero() && server.rate_limit.burst == 0 {
            return Err(ConfigError::invalid_value(
                "server",
                name,
                "rate_limit.burst",
                "must be at least 1 when an interval is set",
            ));
        }
    }

    Ok(())
}

/// Two enabled servers may not bind the same address and port
fn validate_unique_endpoints(config: &Config) -> Result<()> {
    let mut endpoints: HashMap<(&str, u16), Vec<&str>> = HashMap::new();

    for server in config.enabled_servers() {
        if let Some(port) = server.effective_port() {
            endpoints
                .entry((server.address_key(), port))
                .or_default()
                .push(server.input_name.as_str());
        }
    }

    // Sorted so the reported conflict is stable
    let mut conflicts: Vec<_> = endpoints
        .into_iter()
        .filter(|(_, names)| names.len() > 1)
        .collect();
    conflicts.sort();

    if let Some(((address, port), names)) = conflicts.into_iter().next() {
        return Err(ConfigError::duplicate_port(address, port, names.join(", ")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::servers::TcpServerConfig;

    fn server(name: &str, port: &str) -> TcpServerConfig {
        TcpServerConfig {
            input_name: name.into(),
            port: port.into(),
            ..Default::default()
        }
    }

    fn config_with(servers: Vec<TcpServerConfig>) -> Config {
        Config {
            servers,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_server_is_valid() {
        assert!(validate_config(&config_with(vec![server("a", "10514")])).is_ok());
    }

    #[test]
    fn test_no_servers() {
        let result = validate_config(&Config::default());
        assert!(matches!(result, Err(ConfigError::NoServersEnabled)));
    }

    #[test]
    fn test_all_servers_disabled() {
        let mut disabled = server("a", "10514");
        disabled.enabled = false;
        let result = validate_config(&config_with(vec![disabled]));
        assert!(matches!(result, Err(ConfigError::NoServersEnabled)));
    }

    #[test]
    fn test_invalid_port() {
        let result = validate_config(&config_with(vec![server("a", "syslog")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "port", .. })
        ));
    }

    #[test]
    fn test_duplicate_port() {
        let result = validate_config(&config_with(vec![
            server("a", "10514"),
            server("b", "10514"),
        ]));
        match result {
            Err(ConfigError::DuplicatePort {
                address,
                port,
                servers,
            }) => {
                assert_eq!(address, "*");
                assert_eq!(port, 10514);
                assert_eq!(servers, "a, b");
            }
            other => panic!("expected DuplicatePort, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_port_collides_with_514() {
        let result = validate_config(&config_with(vec![server("a", "0"), server("b", "514")]));
        assert!(matches!(
            result,
            Err(ConfigError::DuplicatePort { port: 514, .. })
        ));
    }

    #[test]
    fn test_same_port_different_addresses() {
        let mut a = server("a", "10514");
        a.address = Some("127.0.0.1".into());
        let mut b = server("b", "10514");
        b.address = Some("127.0.0.2".into());
        assert!(validate_config(&config_with(vec![a, b])).is_ok());
    }

    #[test]
    fn test_disabled_server_does_not_conflict() {
        let mut b = server("b", "10514");
        b.enabled = false;
        assert!(validate_config(&config_with(vec![server("a", "10514"), b])).is_ok());
    }

    #[test]
    fn test_lf_disabled_without_delimiter() {
        let mut a = server("a", "10514");
        a.disable_lf_delimiter = true;
        let result = validate_config(&config_with(vec![a.clone()]));
        assert!(matches!(
            result,
            Err(ConfigError::MissingField {
                field: "additional_frame_delimiter",
                ..
            })
        ));

        a.additional_frame_delimiter = Some(0);
        assert!(validate_config(&config_with(vec![a])).is_ok());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut a = server("a", "10514");
        a.max_frame_size = 0;
        assert!(matches!(
            validate_config(&config_with(vec![a])),
            Err(ConfigError::InvalidValue {
                field: "max_frame_size",
                ..
            })
        ));

        let mut config = config_with(vec![server("a", "10514")]);
        config.global.max_message_size = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidValue {
                field: "max_message_size",
                ..
            })
        ));
    }

    #[test]
    fn test_backlog_must_be_positive() {
        let mut a = server("a", "10514");
        a.backlog = 0;
        assert!(matches!(
            validate_config(&config_with(vec![a])),
            Err(ConfigError::InvalidValue {
                field: "backlog",
                ..
            })
        ));
    }

    #[test]
    fn test_session_cap_must_be_positive() {
        let mut a = server("a", "10514");
        a.max_sessions = 0;
        assert!(matches!(
            validate_config(&config_with(vec![a])),
            Err(ConfigError::InvalidValue {
                field: "max_sessions",
                ..
            })
        ));
    }

    #[test]
    fn test_rate_limit_needs_burst() {
        let mut a = server("a", "10514");
        a.rate_limit.interval = Duration::from_secs(1);
        a.rate_limit.burst = 0;
        assert!(matches!(
            validate_config(&config_with(vec![a])),
            Err(ConfigError::InvalidValue {
                field: "rate_limit.burst",
                ..
            })
        ));
    }
}
