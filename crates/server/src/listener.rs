//! Listening socket
//!
//! One bound socket of a server. On readiness the accept loop drains the
//! whole backlog and turns every connection into a registered [`Session`].

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio_util::sync::CancellationToken;

use crate::handler::OpenEvent;
use crate::multiplexer::{EventContext, EventMultiplexer, EventToken};
use crate::server::{ServerContext, SessionTable};
use crate::session::Session;

/// Default listen backlog
pub const DEFAULT_BACKLOG: i32 = 511;

/// TCP keepalive settings for accepted connections
///
/// Unset values keep the system defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    pub probes: Option<u32>,
    pub time: Option<Duration>,
    pub interval: Option<Duration>,
}

/// One bound, listening socket
pub struct Listener {
    ctx: Arc<ServerContext>,
    sessions: Arc<SessionTable>,
    mux: Arc<dyn EventMultiplexer>,
    cancel: CancellationToken,
    socket: Mutex<Option<TcpListener>>,
    fd: RawFd,
    local_addr: SocketAddr,
    token: OnceLock<EventToken>,
    closed: AtomicBool,
}

impl Listener {
    pub(crate) fn new(
        socket: TcpListener,
        ctx: Arc<ServerContext>,
        sessions: Arc<SessionTable>,
        mux: Arc<dyn EventMultiplexer>,
        cancel: CancellationToken,
    ) -> io::Result<Self> {
        let local_addr = socket.local_addr()?;
        Ok(Self {
            fd: socket.as_raw_fd(),
            local_addr,
            ctx,
            sessions,
            mux,
            cancel,
            socket: Mutex::new(Some(socket)),
            token: OnceLock::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn set_token(&self, token: EventToken) {
        let _ = self.token.set(token);
    }

    /// Accept every pending connection
    ///
    /// Returns the number of sessions created. Ends on `WouldBlock`, on
    /// cancellation, or on the first hard accept error (retried on the next
    /// readiness notification).
    pub fn accept_loop(&self) -> usize {
        let guard = self.socket.lock();
        let Some(socket) = guard.as_ref() else {
            return 0;
        };

        let mut accepted = 0;
        while !self.cancel.is_cancelled() {
            match socket.accept() {
                Ok((stream, addr)) => {
                    if self.start_session(stream, addr) {
                        accepted += 1;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if is_resource_exhaustion(&e) {
                        tracing::error!(
                            server = %self.ctx.input_name,
                            address = %self.local_addr,
                            error = %e,
                            "accept failed, out of resources"
                        );
                    } else {
                        tracing::warn!(
                            server = %self.ctx.input_name,
                            address = %self.local_addr,
                            error = %e,
                            "accept error"
                        );
                    }
                    break;
                }
            }
        }
        accepted
    }

    fn start_session(&self, stream: TcpStream, addr: SocketAddr) -> bool {
        if self.sessions.len() >= self.ctx.max_sessions {
            tracing::error!(
                server = %self.ctx.input_name,
                peer = %addr.ip(),
                max_sessions = self.ctx.max_sessions,
                "too many tcp sessions, dropping incoming connection"
            );
            return false;
        }

        let peer = self.ctx.resolver.resolve_peer(&addr);

        if let Err(e) = self.ctx.handler.on_accept(&peer) {
            tracing::warn!(
                server = %self.ctx.input_name,
                peer = %peer,
                error = %e,
                "connection rejected by handler"
            );
            return false;
        }

        configure_keepalive(&stream, &self.ctx.keepalive);

        let id = self.sessions.next_id();
        let session = Arc::new(Session::new(
            id,
            stream,
            peer,
            Arc::clone(&self.ctx),
            Arc::clone(&self.sessions),
            Arc::clone(&self.mux),
        ));
        self.sessions.insert(Arc::clone(&session));

        match self
            .mux
            .register(session.fd(), EventContext::Session(Arc::clone(&session)))
        {
            Ok(token) => session.set_token(token),
            Err(e) => {
                tracing::error!(
                    server = %self.ctx.input_name,
                    peer = %session.peer(),
                    error = %e,
                    "failed to register session, dropping connection"
                );
                session.close();
                return false;
            }
        }

        tracing::debug!(
            server = %self.ctx.input_name,
            session = id,
            peer = %session.peer(),
            "connection accepted"
        );
        self.ctx.handler.on_open(&OpenEvent {
            session_id: id,
            input_name: &self.ctx.input_name,
            peer: session.peer(),
            notify: self.ctx.notify_on_open,
        });
        true
    }

    /// Deregister and close the socket
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(token) = self.token.get()
            && let Err(e) = self.mux.deregister(*token, self.fd)
        {
            tracing::debug!(address = %self.local_addr, error = %e, "failed to deregister listener");
        }
        self.socket.lock().take();
    }
}

/// Create, configure, bind and listen a non-blocking socket for `addr`
pub(crate) fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// Apply keepalive settings; failures are logged, never fatal
fn configure_keepalive(stream: &TcpStream, config: &KeepaliveConfig) {
    if !config.enabled {
        return;
    }

    let socket = SockRef::from(stream);
    let mut keepalive = TcpKeepalive::new();
    if let Some(time) = config.time {
        keepalive = keepalive.with_time(time);
    }
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "macos"
    ))]
    {
        if let Some(interval) = config.interval {
            keepalive = keepalive.with_interval(interval);
        }
        if let Some(probes) = config.probes {
            keepalive = keepalive.with_retries(probes);
        }
    }

    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        tracing::warn!(error = %e, "failed to set TCP keepalive");
    }
}

/// Out of descriptors or memory
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
    )
}
