//! ptcp - Plain-TCP Syslog Reception Engine
//!
//! Receives syslog over plain TCP with many concurrent connections and a
//! bounded number of threads.
//!
//! # Components
//!
//! - **Framing** - per-connection state machine, octet-stuffing and RFC 6587
//!   octet-counting chosen per frame
//! - **Session** - one accepted connection (socket + decoder + peer identity)
//! - **Listener** - one bound socket; drains the accept backlog on readiness
//! - **Server** - one configured endpoint; owns listeners and sessions
//! - **Multiplexer** - epoll (via `mio`) with a `poll(2)` fallback
//! - **Worker pool / Dispatcher** - wait, distribute, join, repeat
//!
//! # Design Principles
//!
//! - **No thread per connection**: readiness-driven, non-blocking sockets
//! - **Exact framing state**: frames survive arbitrary read boundaries
//! - **Errors stay local**: a broken connection only closes its own session
//! - **No starvation**: a session yields after a bounded number of reads
//! - **Cooperative shutdown**: a cancellation token plus bounded waits
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ptcp_server::{ChannelSubmitter, Dispatcher, DispatcherConfig, Server, ServerConfig};
//!
//! let (submitter, mut rx) = ChannelSubmitter::new(10_000);
//! let mut dispatcher = Dispatcher::new(DispatcherConfig::default())?;
//! dispatcher.add_server(Server::new(ServerConfig::with_port("1514"), Arc::new(submitter)))?;
//!
//! let handle = dispatcher.handle();
//! std::thread::spawn(move || dispatcher.run());
//! ```

pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod handler;
pub mod listener;
pub mod multiplexer;
pub mod peer;
pub mod ratelimit;
pub mod server;
pub mod session;
pub mod submit;
pub mod worker;

#[cfg(test)]
mod test_util;

pub use dispatcher::{DEFAULT_POLL_INTERVAL, Dispatcher, DispatcherConfig, DispatcherHandle};
pub use error::{DispatcherError, HandlerError, ServerError, SubmitError};
pub use framing::{FrameDecoder, FrameEvent, Framing, FramingConfig, FramingIssue};
pub use handler::{CloseEvent, CloseReason, ConnectionHandler, OpenEvent, PlainTcpHandler};
pub use listener::{DEFAULT_BACKLOG, KeepaliveConfig, Listener};
pub use multiplexer::{EventContext, EventMultiplexer, EventToken, MultiplexerKind};
pub use peer::{AddressResolver, PeerIdentity, SystemResolver};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use server::{
    DEFAULT_MAX_SESSIONS, DEFAULT_STARVATION_MAX_READS, Server, ServerBuilder, ServerConfig,
};
pub use session::{ReceiveStatus, Session};
pub use submit::{
    ChannelSubmitter, DEFAULT_CHANNEL_CAPACITY, FlowControl, Message, MessageSubmitter,
};
pub use worker::{DEFAULT_WORKER_THREADS, MAX_WORKER_THREADS, WorkerPool};
