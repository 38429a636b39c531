//! Connection handler seam
//!
//! A server is bound to one [`ConnectionHandler`] that is consulted at accept
//! time, once the session opens, for every received chunk and at close. The
//! plain handler passes bytes through untouched; a TLS or GSSAPI flavour would
//! unwrap them here.

use std::borrow::Cow;

use crate::error::HandlerError;
use crate::peer::PeerIdentity;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the connection
    PeerClosed,
    /// Read failed
    Error,
    /// Server is shutting down
    Shutdown,
}

/// Details passed to [`ConnectionHandler::on_open`]
#[derive(Debug, Clone, Copy)]
pub struct OpenEvent<'a> {
    pub session_id: u64,
    pub input_name: &'a str,
    pub peer: &'a PeerIdentity,
    /// Server is configured to emit a notice on open
    pub notify: bool,
}

/// Details passed to [`ConnectionHandler::on_close`]
#[derive(Debug, Clone, Copy)]
pub struct CloseEvent<'a> {
    pub session_id: u64,
    pub input_name: &'a str,
    pub peer: &'a PeerIdentity,
    pub reason: CloseReason,
    /// Server is configured to emit a notice on close
    pub notify: bool,
}

/// Per-flavour connection behaviour
pub trait ConnectionHandler: Send + Sync {
    /// Flavour name, for log records
    fn name(&self) -> &'static str;

    /// Called once per accepted connection, before the session exists
    ///
    /// An error rejects the connection.
    fn on_accept(&self, _peer: &PeerIdentity) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called once the session is registered and will receive data
    fn on_open(&self, _event: &OpenEvent<'_>) {}

    /// Transform received bytes before framing
    fn on_data<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>, HandlerError> {
        Ok(Cow::Borrowed(data))
    }

    /// Called once when a session ends
    fn on_close(&self, event: &CloseEvent<'_>);
}

/// Plain TCP: no transformation
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTcpHandler;

impl ConnectionHandler for PlainTcpHandler {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn on_open(&self, event: &OpenEvent<'_>) {
        if event.notify {
            tracing::info!(
                server = %event.input_name,
                session = event.session_id,
                peer = %event.peer.hostname,
                "{} connection established with host: {}",
                event.input_name,
                event.peer.hostname,
            );
        }
    }

    fn on_close(&self, event: &CloseEvent<'_>) {
        if event.notify && event.reason == CloseReason::PeerClosed {
            tracing::info!(
                server = %event.input_name,
                session = event.session_id,
                peer = %event.peer.hostname,
                "{} session {} closed by remote peer {}",
                event.input_name,
                event.session_id,
                event.peer.hostname,
            );
        } else {
            tracing::debug!(
                server = %event.input_name,
                session = event.session_id,
                peer = %event.peer,
                reason = ?event.reason,
                "session closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_handler_passes_bytes_through() {
        let handler = PlainTcpHandler;
        let data = b"<13>hello\n";
        let out = handler.on_data(data).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, data);
    }

    #[test]
    fn test_plain_handler_open_notice_is_optional() {
        let peer = PeerIdentity::numeric("127.0.0.1:1".parse().unwrap());
        for notify in [false, true] {
            PlainTcpHandler.on_open(&OpenEvent {
                session_id: 1,
                input_name: "imptcp",
                peer: &peer,
                notify,
            });
        }
    }

    #[test]
    fn test_plain_handler_accepts_everyone() {
        let peer = PeerIdentity::numeric("127.0.0.1:1".parse().unwrap());
        assert!(PlainTcpHandler.on_accept(&peer).is_ok());
        assert_eq!(PlainTcpHandler.name(), "plain");
    }
}
