//! Readiness notification
//!
//! One [`EventMultiplexer`] serves every listener and session socket of the
//! dispatcher. Two implementations exist:
//!
//! - [`EpollMultiplexer`] - epoll/kqueue through `mio`, edge-triggered
//! - [`PollMultiplexer`] - `poll(2)`, level-triggered, O(n) per wait
//!
//! [`create`] picks one at construction time; nothing downstream knows which.
//! Because the epoll flavour is edge-triggered, every consumer either drains
//! its socket until `WouldBlock` or is queued again without a notification.

mod epoll;
mod poll;

use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

pub use epoll::EpollMultiplexer;
pub use poll::PollMultiplexer;

use crate::listener::Listener;
use crate::session::Session;

/// Registration handle
///
/// Tokens are never reused, so a late event for a deregistered socket can't be
/// mistaken for a newer socket that got the same descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventToken(pub(crate) usize);

/// What a registered socket belongs to
#[derive(Clone)]
pub enum EventContext {
    Listener(Arc<Listener>),
    Session(Arc<Session>),
}

impl EventContext {
    /// Whether both refer to the same listener or session
    pub(crate) fn same_source(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Listener(a), Self::Listener(b)) => Arc::ptr_eq(a, b),
            (Self::Session(a), Self::Session(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener(l) => write!(f, "Listener({})", l.local_addr()),
            Self::Session(s) => write!(f, "Session({})", s.id()),
        }
    }
}

/// Readiness facility in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiplexerKind {
    #[default]
    Epoll,
    Poll,
}

impl fmt::Display for MultiplexerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epoll => write!(f, "epoll"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

/// Readiness notification over a changing set of sockets
///
/// `register`/`deregister` may be called from any thread, including while
/// another thread is blocked in `wait`.
pub trait EventMultiplexer: Send + Sync {
    /// Watch `fd` for readability
    fn register(&self, fd: RawFd, context: EventContext) -> io::Result<EventToken>;

    /// Stop watching; must happen before `fd` is closed
    fn deregister(&self, token: EventToken, fd: RawFd) -> io::Result<()>;

    /// Block until something is readable, `timeout` elapses or `wake` is called
    ///
    /// Ready contexts are appended to `ready`. An interrupted wait returns
    /// `Ok` with nothing appended.
    fn wait(&self, ready: &mut Vec<EventContext>, timeout: Option<Duration>) -> io::Result<()>;

    /// Interrupt a blocked `wait`
    fn wake(&self) -> io::Result<()>;

    /// Facility in use
    fn kind(&self) -> MultiplexerKind;

    /// Number of registered sockets
    fn registered(&self) -> usize;
}

/// Create the preferred multiplexer, falling back to polling
pub fn create(preferred: MultiplexerKind) -> io::Result<Arc<dyn EventMultiplexer>> {
    if preferred == MultiplexerKind::Epoll {
        match EpollMultiplexer::new() {
            Ok(mux) => return Ok(Arc::new(mux)),
            Err(e) => {
                tracing::warn!(error = %e, "epoll unavailable, falling back to poll");
            }
        }
    }
    Ok(Arc::new(PollMultiplexer::new()?))
}

#[cfg(test)]
#[path = "multiplexer_test.rs"]
mod multiplexer_test;
