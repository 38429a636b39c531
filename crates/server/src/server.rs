//! Syslog TCP server
//!
//! One configured endpoint: it binds one listener per resolved address and
//! owns the set of sessions accepted on any of them.
//!
//! # Design
//!
//! - **Shared context** - immutable per-endpoint settings live in an
//!   `Arc<ServerContext>` that listeners and sessions hold, so nothing points
//!   back at the `Server` itself
//! - **Session table** - the only structure mutated from several threads
//!   (insert at accept, remove at close), behind a mutex
//! - **Idempotent shutdown** - listeners first, then sessions, then the limiter
//!
//! # Example
//!
//! ```ignore
//! let (submitter, rx) = ChannelSubmitter::new(DEFAULT_CHANNEL_CAPACITY);
//! let server = Server::new(ServerConfig::with_port("1514"), Arc::new(submitter));
//! server.startup(&mux)?;
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::framing::FramingConfig;
use crate::handler::{ConnectionHandler, PlainTcpHandler};
use crate::listener::{DEFAULT_BACKLOG, KeepaliveConfig, Listener, bind_listener};
use crate::multiplexer::{EventContext, EventMultiplexer};
use crate::peer::{AddressResolver, SystemResolver};
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::session::Session;
use crate::submit::MessageSubmitter;

// =============================================================================
// Constants
// =============================================================================

/// Port used when the configured port is "0" or empty
pub const DEFAULT_PORT: u16 = 514;

/// Default input name attached to every message
pub const DEFAULT_INPUT_NAME: &str = "imptcp";

/// Default ruleset binding
pub const DEFAULT_RULESET: &str = "default";

/// Default cap on concurrent sessions per server
pub const DEFAULT_MAX_SESSIONS: usize = 200;

/// Default reads per session before it yields to other sockets
pub const DEFAULT_STARVATION_MAX_READS: usize = 500;

// =============================================================================
// Configuration
// =============================================================================

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind address (`None` = all interfaces, IPv6 and IPv4)
    pub address: Option<String>,

    /// Bind port ("0" = 514)
    pub port: String,

    /// Input name carried by every message
    pub input_name: String,

    /// Ruleset carried by every message
    pub ruleset: String,

    /// Framing settings for every session
    pub framing: FramingConfig,

    /// Keepalive for accepted connections
    pub keepalive: KeepaliveConfig,

    /// Log a notice when a peer closes its connection
    pub notify_on_close: bool,

    /// Log a notice when a connection is established
    pub notify_on_open: bool,

    /// Connections beyond this many open sessions are dropped at accept
    pub max_sessions: usize,

    /// Reads per readiness round before a session yields (0 = unlimited)
    pub starvation_max_reads: usize,

    /// Listen backlog
    pub backlog: i32,

    /// Message rate limit
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: DEFAULT_PORT.to_string(),
            input_name: DEFAULT_INPUT_NAME.into(),
            ruleset: DEFAULT_RULESET.into(),
            framing: FramingConfig::default(),
            keepalive: KeepaliveConfig::default(),
            notify_on_close: false,
            notify_on_open: false,
            max_sessions: DEFAULT_MAX_SESSIONS,
            starvation_max_reads: DEFAULT_STARVATION_MAX_READS,
            backlog: DEFAULT_BACKLOG,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config with custom port
    pub fn with_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Port to bind, with "0" and "" mapped to the syslog default
    pub fn bind_port(&self) -> Result<u16, ServerError> {
        let port = self.port.trim();
        if port.is_empty() {
            return Ok(DEFAULT_PORT);
        }
        match port.parse::<u16>() {
            Ok(0) => Ok(DEFAULT_PORT),
            Ok(port) => Ok(port),
            Err(_) => Err(ServerError::InvalidPort(self.port.clone())),
        }
    }

    /// Human-readable bind address for log records
    pub fn bind_display(&self) -> String {
        format!("{}:{}", self.address.as_deref().unwrap_or("*"), self.port)
    }
}

// =============================================================================
// Shared state
// =============================================================================

/// Immutable per-server state shared with listeners and sessions
pub(crate) struct ServerContext {
    pub(crate) input_name: Arc<str>,
    pub(crate) ruleset: Arc<str>,
    pub(crate) framing: FramingConfig,
    pub(crate) keepalive: KeepaliveConfig,
    pub(crate) notify_on_close: bool,
    pub(crate) notify_on_open: bool,
    pub(crate) max_sessions: usize,
    pub(crate) starvation_max_reads: usize,
    pub(crate) handler: Arc<dyn ConnectionHandler>,
    pub(crate) submitter: Arc<dyn MessageSubmitter>,
    pub(crate) resolver: Arc<dyn AddressResolver>,
    pub(crate) rate_limiter: RateLimiter,
}

/// Sessions of one server, keyed by session id
#[derive(Default)]
pub(crate) struct SessionTable {
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionTable {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn insert(&self, session: Arc<Session>) {
        self.sessions.lock().insert(session.id(), session);
    }

    pub(crate) fn remove(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.lock().remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Empty the table, returning what it held
    pub(crate) fn drain(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().drain().map(|(_, s)| s).collect()
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }
}

// =============================================================================
// Server
// =============================================================================

/// One configured TCP endpoint
pub struct Server {
    config: ServerConfig,
    ctx: Arc<ServerContext>,
    sessions: Arc<SessionTable>,
    listeners: Mutex<Vec<Arc<Listener>>>,
    cancel: CancellationToken,
    shut_down: AtomicBool,
}

impl Server {
    /// Create a plain-TCP server with the system resolver
    pub fn new(config: ServerConfig, submitter: Arc<dyn MessageSubmitter>) -> Self {
        Self::builder(config, submitter).build()
    }

    /// Start building a server with non-default collaborators
    pub fn builder(config: ServerConfig, submitter: Arc<dyn MessageSubmitter>) -> ServerBuilder {
        ServerBuilder {
            config,
            submitter,
            handler: Arc::new(PlainTcpHandler),
            resolver: Arc::new(SystemResolver::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn input_name(&self) -> &str {
        &self.ctx.input_name
    }

    /// Bind and register a listener for every candidate address
    ///
    /// Succeeds when at least one candidate is listening.
    pub fn startup(&self, mux: &Arc<dyn EventMultiplexer>) -> Result<(), ServerError> {
        let port = self.config.bind_port()?;
        let candidates = self
            .ctx
            .resolver
            .resolve_bind(self.config.address.as_deref(), port)
            .map_err(|e| ServerError::Resolve {
                address: self.config.bind_display(),
                source: e,
            })?;

        let mut last_register_error = None;
        let mut listeners = Vec::with_capacity(candidates.len());
        for addr in candidates {
            let socket = match bind_listener(addr, self.config.backlog) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::debug!(
                        server = %self.ctx.input_name,
                        address = %addr,
                        error = %e,
                        "could not bind candidate address"
                    );
                    continue;
                }
            };

            let listener = match Listener::new(
                socket,
                Arc::clone(&self.ctx),
                Arc::clone(&self.sessions),
                Arc::clone(mux),
                self.cancel.clone(),
            ) {
                Ok(listener) => Arc::new(listener),
                Err(e) => {
                    tracing::warn!(address = %addr, error = %e, "listener setup failed");
                    continue;
                }
            };

            match mux.register(listener.fd(), EventContext::Listener(Arc::clone(&listener))) {
                Ok(token) => listener.set_token(token),
                Err(e) => {
                    tracing::error!(
                        server = %self.ctx.input_name,
                        address = %addr,
                        error = %e,
                        "failed to register listener"
                    );
                    last_register_error = Some(ServerError::Register {
                        address: addr.to_string(),
                        source: e,
                    });
                    continue;
                }
            }

            tracing::info!(
                server = %self.ctx.input_name,
                address = %listener.local_addr(),
                ruleset = %self.ctx.ruleset,
                max_message_size = self.ctx.framing.max_line_size,
                octet_counting = self.ctx.framing.octet_counting,
                "syslog TCP server listening"
            );
            listeners.push(listener);
        }

        if listeners.is_empty() {
            return Err(last_register_error.unwrap_or_else(|| ServerError::NoListeners {
                address: self.config.bind_display(),
            }));
        }

        self.listeners.lock().extend(listeners);
        Ok(())
    }

    /// Addresses actually bound
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.lock().iter().map(|l| l.local_addr()).collect()
    }

    /// Open sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Messages dropped by the rate limiter
    pub fn dropped_messages(&self) -> u64 {
        self.ctx.rate_limiter.dropped()
    }

    /// Close every listener, then every session
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in &listeners {
            listener.close();
        }

        let sessions = self.sessions.drain();
        let closed = sessions.len();
        for session in sessions {
            session.shutdown();
        }

        tracing::info!(
            server = %self.ctx.input_name,
            listeners = listeners.len(),
            sessions = closed,
            rate_limited = self.ctx.rate_limiter.dropped(),
            "syslog TCP server stopped"
        );
    }

    pub(crate) fn set_cancel_token(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    #[cfg(test)]
    pub(crate) fn listeners(&self) -> Vec<Arc<Listener>> {
        self.listeners.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.snapshot()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`Server`]
pub struct ServerBuilder {
    config: ServerConfig,
    submitter: Arc<dyn MessageSubmitter>,
    handler: Arc<dyn ConnectionHandler>,
    resolver: Arc<dyn AddressResolver>,
    cancel: CancellationToken,
}

impl ServerBuilder {
    /// Connection flavour (default: plain TCP)
    pub fn handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Address resolver (default: system resolver with DNS)
    pub fn resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Termination token observed by the accept loop
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Server {
        let config = self.config;
        let ctx = ServerContext {
            input_name: Arc::from(config.input_name.as_str()),
            ruleset: Arc::from(config.ruleset.as_str()),
            framing: config.framing.clone(),
            keepalive: config.keepalive,
            notify_on_close: config.notify_on_close,
            notify_on_open: config.notify_on_open,
            max_sessions: config.max_sessions,
            starvation_max_reads: config.starvation_max_reads,
            handler: self.handler,
            submitter: self.submitter,
            resolver: self.resolver,
            rate_limiter: RateLimiter::new(config.input_name.clone(), config.rate_limit),
        };
        Server {
            config,
            ctx: Arc::new(ctx),
            sessions: Arc::new(SessionTable::default()),
            listeners: Mutex::new(Vec::new()),
            cancel: self.cancel,
            shut_down: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;
