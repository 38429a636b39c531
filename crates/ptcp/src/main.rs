//! ptcp - plain TCP syslog receiver
//!
//! # Usage
//!
//! ```bash
//! ptcp --config /etc/ptcp/ptcp.toml
//! ptcp --config ptcp.toml --log-level debug
//! ```
//!
//! Received messages are written to stdout, one per line. Diagnostics go to
//! the destination named in the `[log]` section (stderr by default).

mod output;
mod serve;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ptcp_config::{Config, LogConfig, LogFormat, LogLevel, LogOutput};

/// Plain TCP syslog receiver
#[derive(Parser, Debug)]
#[command(name = "ptcp")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "ptcp.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    init_logging(&config.log, cli.log_level)?;
    serve::run(config).await
}

/// Initialize the tracing subscriber for logging
fn init_logging(log: &LogConfig, level: Option<LogLevel>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log.filter_directive(level)))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);

    match (&log.output, log.format) {
        (LogOutput::Stdout, LogFormat::Console) => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stdout))
            .init(),
        (LogOutput::Stdout, LogFormat::Json) => registry
            .with(fmt::layer().json().with_writer(std::io::stdout))
            .init(),
        (LogOutput::Stderr, LogFormat::Console) => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        (LogOutput::Stderr, LogFormat::Json) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (LogOutput::File(path), format) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            let writer = Mutex::new(file);
            match format {
                LogFormat::Console => registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .init(),
                LogFormat::Json => registry.with(fmt::layer().json().with_writer(writer)).init(),
            }
        }
    }

    Ok(())
}
