//! Shared helpers for unit tests over loopback sockets

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::dispatcher::process_event;
use crate::error::SubmitError;
use crate::framing::FramingConfig;
use crate::handler::{CloseEvent, CloseReason, ConnectionHandler, OpenEvent};
use crate::multiplexer::{self, EventMultiplexer, MultiplexerKind};
use crate::peer::SystemResolver;
use crate::server::{Server, ServerConfig};
use crate::submit::{Message, MessageSubmitter};

/// Submitter that keeps everything it receives
#[derive(Default)]
pub(crate) struct CollectingSubmitter {
    messages: Mutex<Vec<Message>>,
}

impl CollectingSubmitter {
    pub(crate) fn frames(&self) -> Vec<Bytes> {
        self.messages.lock().iter().map(|m| m.data.clone()).collect()
    }

    pub(crate) fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

impl MessageSubmitter for CollectingSubmitter {
    fn submit(&self, message: Message) -> Result<(), SubmitError> {
        self.messages.lock().push(message);
        Ok(())
    }
}

/// Handler that records every open and close
#[derive(Default)]
pub(crate) struct RecordingHandler {
    pub(crate) opens: Mutex<Vec<(u64, bool, String)>>,
    pub(crate) closes: Mutex<Vec<(u64, CloseReason, bool, String)>>,
}

impl ConnectionHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn on_open(&self, event: &OpenEvent<'_>) {
        self.opens
            .lock()
            .push((event.session_id, event.notify, event.peer.ip.to_string()));
    }

    fn on_close(&self, event: &CloseEvent<'_>) {
        self.closes.lock().push((
            event.session_id,
            event.reason,
            event.notify,
            event.peer.ip.to_string(),
        ));
    }
}

/// A free loopback port (released before returning)
pub(crate) fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Loopback server config on a free port
pub(crate) fn loopback_config(framing: FramingConfig) -> ServerConfig {
    ServerConfig {
        address: Some("127.0.0.1".into()),
        port: free_port().to_string(),
        framing,
        ..Default::default()
    }
}

/// A started server driven by hand on the test thread
pub(crate) struct Harness {
    pub(crate) mux: Arc<dyn EventMultiplexer>,
    pub(crate) server: Server,
    pub(crate) submitter: Arc<CollectingSubmitter>,
    pub(crate) handler: Arc<RecordingHandler>,
    pub(crate) addr: SocketAddr,
}

impl Harness {
    pub(crate) fn start(config: ServerConfig) -> Self {
        Self::start_with(MultiplexerKind::Epoll, config)
    }

    pub(crate) fn start_with(kind: MultiplexerKind, config: ServerConfig) -> Self {
        let mux = multiplexer::create(kind).unwrap();
        let submitter = Arc::new(CollectingSubmitter::default());
        let handler = Arc::new(RecordingHandler::default());
        let server = Server::builder(config, submitter.clone())
            .handler(handler.clone())
            .resolver(Arc::new(SystemResolver::new(false)))
            .build();
        server.startup(&mux).unwrap();
        let addr = server.local_addrs()[0];
        Self {
            mux,
            server,
            submitter,
            handler,
            addr,
        }
    }

    pub(crate) fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_nodelay(true).unwrap();
        stream
    }

    /// One wait + synchronous processing round
    pub(crate) fn pump(&self) {
        let mut ready = Vec::new();
        self.mux
            .wait(&mut ready, Some(Duration::from_millis(20)))
            .unwrap();
        for context in ready {
            let mut next = process_event(context);
            while let Some(context) = next {
                next = process_event(context);
            }
        }
    }

    /// Pump until `done` holds or five seconds pass
    pub(crate) fn pump_until(&self, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done(self) {
                return true;
            }
            self.pump();
        }
        done(self)
    }

    /// Connect and wait until the server has a session for it
    pub(crate) fn connect_session(&self) -> TcpStream {
        let before = self.server.session_count();
        let stream = self.connect();
        assert!(self.pump_until(|h| h.server.session_count() > before));
        stream
    }
}

/// Write and flush
pub(crate) fn send(stream: &mut TcpStream, data: &[u8]) {
    stream.write_all(data).unwrap();
    stream.flush().unwrap();
}
