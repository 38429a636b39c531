//! Engine errors
//!
//! Only startup problems surface as errors. Everything that goes wrong on a
//! live connection is logged and confined to that connection.

use std::io;

/// Server startup errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Bind port is not a valid TCP port
    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// Bind address could not be resolved
    #[error("failed to resolve bind address {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    /// No candidate address could be bound
    #[error("could not bind any listener for {address}")]
    NoListeners { address: String },

    /// Listener bound but could not be registered for readiness
    #[error("failed to register listener {address}: {source}")]
    Register {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Dispatcher errors
#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    /// `run` was called without a started server
    #[error("no servers started")]
    NoServers,

    /// Neither readiness facility could be created
    #[error("failed to create event multiplexer: {0}")]
    Multiplexer(#[source] io::Error),

    /// A server failed to start
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Message hand-off errors
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Consumer side is gone
    #[error("message channel closed")]
    ChannelClosed,

    /// Consumer is full and the message asked not to wait
    #[error("message queue full")]
    QueueFull,
}

/// Connection handler errors
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler refused the connection
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// Transport layer failure inside the handler
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
