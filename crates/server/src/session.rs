//! TCP session
//!
//! Server-side state of one accepted connection: the socket, its frame
//! decoder and the peer identity resolved at accept time.
//!
//! A session is processed by at most one thread at a time (the dispatcher
//! joins every batch before waiting again), so the state lock is uncontended
//! and only makes the ownership explicit.

use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use mio::net::TcpStream;
use parking_lot::Mutex;

use crate::framing::{FrameDecoder, FrameEvent, FramingIssue};
use crate::handler::{CloseEvent, CloseReason};
use crate::multiplexer::{EventMultiplexer, EventToken};
use crate::peer::PeerIdentity;
use crate::server::{ServerContext, SessionTable};
use crate::submit::{FlowControl, Message};

/// Bytes read per `read` call
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Frames handed to the submitter per batch
pub const MAX_SUBMIT_BATCH: usize = 1024;

/// Result of one [`Session::receive`] round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// Socket drained; session stays open
    MoreDataProcessed,
    /// Read cap reached before the socket drained; session stays open and
    /// must be processed again without waiting for new readiness
    MoreDataPending,
    /// Peer closed the connection; session closed
    ClosedByPeer,
    /// Read failed; session closed
    IoError,
}

struct SessionState {
    stream: Option<TcpStream>,
    decoder: FrameDecoder,
}

/// One accepted connection
pub struct Session {
    id: u64,
    peer: PeerIdentity,
    fd: RawFd,
    ctx: Arc<ServerContext>,
    sessions: Arc<SessionTable>,
    mux: Arc<dyn EventMultiplexer>,
    token: OnceLock<EventToken>,
    state: Mutex<SessionState>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        stream: TcpStream,
        peer: PeerIdentity,
        ctx: Arc<ServerContext>,
        sessions: Arc<SessionTable>,
        mux: Arc<dyn EventMultiplexer>,
    ) -> Self {
        let decoder = FrameDecoder::new(ctx.framing.clone());
        Self {
            id,
            fd: stream.as_raw_fd(),
            peer,
            ctx,
            sessions,
            mux,
            token: OnceLock::new(),
            state: Mutex::new(SessionState {
                stream: Some(stream),
                decoder,
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Session id, unique within its server
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer identity resolved at accept time
    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Raw socket descriptor (stays valid until close)
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn set_token(&self, token: EventToken) {
        let _ = self.token.set(token);
    }

    /// Drain the socket, frame what arrived and submit the frames
    ///
    /// Stops after `starvation_max_reads` reads so one busy peer cannot hold
    /// the dispatcher. Closes the session on EOF or a hard read error.
    pub fn receive(&self) -> ReceiveStatus {
        let status = {
            let mut state = self.state.lock();
            self.drain(&mut state)
        };

        match status {
            ReceiveStatus::MoreDataProcessed | ReceiveStatus::MoreDataPending => {}
            ReceiveStatus::ClosedByPeer => self.finish_close(CloseReason::PeerClosed),
            ReceiveStatus::IoError => self.finish_close(CloseReason::Error),
        }
        status
    }

    fn drain(&self, state: &mut SessionState) -> ReceiveStatus {
        let SessionState { stream, decoder } = state;
        let Some(stream) = stream.as_mut() else {
            return ReceiveStatus::IoError;
        };

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let mut batch = Vec::new();
        let max_reads = self.ctx.starvation_max_reads;
        let mut reads = 0usize;

        loop {
            if max_reads > 0 && reads >= max_reads {
                tracing::trace!(
                    server = %self.ctx.input_name,
                    session = self.id,
                    reads,
                    "read cap reached, yielding"
                );
                return ReceiveStatus::MoreDataPending;
            }

            let n = match stream.read(&mut buf) {
                Ok(0) => {
                    self.flush_pending(decoder, &mut batch);
                    return ReceiveStatus::ClosedByPeer;
                }
                Ok(n) => {
                    reads += 1;
                    n
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return ReceiveStatus::MoreDataProcessed;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if is_connection_reset(&e) {
                        tracing::debug!(
                            server = %self.ctx.input_name,
                            peer = %self.peer,
                            error = %e,
                            "connection reset"
                        );
                    } else {
                        tracing::warn!(
                            server = %self.ctx.input_name,
                            peer = %self.peer,
                            error = %e,
                            "read error, closing session"
                        );
                    }
                    self.flush_pending(decoder, &mut batch);
                    return ReceiveStatus::IoError;
                }
            };

            let data = match self.ctx.handler.on_data(&buf[..n]) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(
                        server = %self.ctx.input_name,
                        peer = %self.peer,
                        error = %e,
                        "connection handler failed, closing session"
                    );
                    return ReceiveStatus::IoError;
                }
            };

            decoder.feed(&data, |event| self.on_frame_event(event, &mut batch));
            self.submit(&mut batch);
        }
    }

    /// Flush a pending stuffed frame at end of stream
    fn flush_pending(&self, decoder: &mut FrameDecoder, batch: &mut Vec<Message>) {
        decoder.finish(|event| self.on_frame_event(event, batch));
        self.submit(batch);
    }

    fn on_frame_event(&self, event: FrameEvent, batch: &mut Vec<Message>) {
        match event {
            FrameEvent::Frame(data) => {
                if !self.ctx.rate_limiter.check() {
                    return;
                }
                batch.push(Message {
                    data,
                    hostname: self.peer.hostname.clone(),
                    ip: self.peer.ip.clone(),
                    ruleset: self.ctx.ruleset.clone(),
                    input_name: self.ctx.input_name.clone(),
                    flow_control: FlowControl::LightDelay,
                });
                if batch.len() >= MAX_SUBMIT_BATCH {
                    self.submit(batch);
                }
            }
            FrameEvent::Issue(issue) => self.log_issue(&issue),
        }
    }

    fn log_issue(&self, issue: &FramingIssue) {
        if issue.is_error() {
            tracing::warn!(
                server = %self.ctx.input_name,
                peer = %self.peer,
                "{issue}"
            );
        } else {
            tracing::debug!(
                server = %self.ctx.input_name,
                peer = %self.peer,
                "{issue}"
            );
        }
    }

    fn submit(&self, batch: &mut Vec<Message>) {
        if batch.is_empty() {
            return;
        }
        let messages = std::mem::take(batch);
        let count = messages.len();
        if let Err(e) = self.ctx.submitter.submit_batch(messages) {
            tracing::warn!(
                server = %self.ctx.input_name,
                peer = %self.peer,
                error = %e,
                count,
                "failed to submit messages"
            );
        }
    }

    fn finish_close(&self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        self.ctx.handler.on_close(&CloseEvent {
            session_id: self.id,
            input_name: &self.ctx.input_name,
            peer: &self.peer,
            reason,
            notify: self.ctx.notify_on_close,
        });
        self.close();
    }

    /// Close because the server is going away
    pub(crate) fn shutdown(&self) {
        self.finish_close(CloseReason::Shutdown);
    }

    /// Deregister, close the socket and leave the server's session set
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(token) = self.token.get()
            && let Err(e) = self.mux.deregister(*token, self.fd)
        {
            tracing::debug!(session = self.id, error = %e, "failed to deregister session");
        }

        {
            let mut state = self.state.lock();
            state.stream = None;
            state.decoder.release();
        }

        self.sessions.remove(self.id);
    }
}

/// Check if error is a connection reset (peer went away abruptly)
pub(crate) fn is_connection_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
