//! Readiness dispatcher
//!
//! Owns the multiplexer, the worker pool and every started server, and runs
//! the loop: wait for readiness, hand each ready socket to the pool, join the
//! batch, repeat. Runs on a dedicated thread until stopped.
//!
//! Sessions that stop at their read cap are queued again by the dispatcher
//! itself. Readiness is edge-triggered, so no new event would arrive for data
//! already sitting in the socket.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{DispatcherError, ServerError};
use crate::multiplexer::{self, EventContext, EventMultiplexer, MultiplexerKind};
use crate::server::Server;
use crate::session::ReceiveStatus;
use crate::worker::{DEFAULT_WORKER_THREADS, WorkerPool};

/// Default bound on a single wait, so termination is noticed promptly
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pause after a failed wait before trying again
const WAIT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Ready events fetched per wait
const READY_BATCH_CAPACITY: usize = 1024;

/// Dispatcher configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Requested worker threads (clamped to the pool maximum)
    pub worker_threads: usize,

    /// Longest single wait
    pub poll_interval: Duration,

    /// Preferred readiness facility
    pub multiplexer: MultiplexerKind,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            multiplexer: MultiplexerKind::Epoll,
        }
    }
}

/// Cloneable handle that stops a running dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    cancel: CancellationToken,
    mux: Arc<dyn EventMultiplexer>,
}

impl DispatcherHandle {
    /// Request termination and interrupt the current wait
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Err(e) = self.mux.wake() {
            tracing::debug!(error = %e, "failed to wake multiplexer");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Event loop over all servers
pub struct Dispatcher {
    config: DispatcherConfig,
    mux: Arc<dyn EventMultiplexer>,
    servers: Vec<Arc<Server>>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher with its own termination token
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatcherError> {
        Self::with_cancel_token(config, CancellationToken::new())
    }

    /// Create a dispatcher observing `cancel`
    pub fn with_cancel_token(
        config: DispatcherConfig,
        cancel: CancellationToken,
    ) -> Result<Self, DispatcherError> {
        let mux = multiplexer::create(config.multiplexer).map_err(DispatcherError::Multiplexer)?;
        Ok(Self {
            config,
            mux,
            servers: Vec::new(),
            cancel,
        })
    }

    /// Readiness facility actually in use
    pub fn multiplexer_kind(&self) -> MultiplexerKind {
        self.mux.kind()
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            cancel: self.cancel.clone(),
            mux: Arc::clone(&self.mux),
        }
    }

    /// Start `server` and take ownership of it
    ///
    /// On failure the server is dropped and the error returned; servers already
    /// added keep running.
    pub fn add_server(&mut self, mut server: Server) -> Result<Arc<Server>, ServerError> {
        server.set_cancel_token(self.cancel.child_token());
        server.startup(&self.mux)?;
        let server = Arc::new(server);
        self.servers.push(Arc::clone(&server));
        Ok(server)
    }

    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    /// Run until stopped, then shut every server down
    pub fn run(self) -> Result<(), DispatcherError> {
        if self.servers.is_empty() {
            return Err(DispatcherError::NoServers);
        }

        let requeued = Arc::new(Mutex::new(Vec::new()));
        let mut pool = {
            let requeued = Arc::clone(&requeued);
            WorkerPool::new(
                self.config.worker_threads,
                self.cancel.child_token(),
                move |context| {
                    if let Some(context) = process_event(context) {
                        requeued.lock().push(context);
                    }
                },
            )
        };

        tracing::info!(
            servers = self.servers.len(),
            workers = pool.size(),
            multiplexer = %self.mux.kind(),
            "dispatcher started"
        );

        let mut ready = Vec::with_capacity(READY_BATCH_CAPACITY);
        let mut pending = Vec::new();
        while !self.cancel.is_cancelled() {
            ready.clear();
            pending.append(&mut *requeued.lock());

            // Pending sessions still have data: only look for new readiness
            let timeout = if pending.is_empty() {
                self.config.poll_interval
            } else {
                Duration::ZERO
            };
            if let Err(e) = self.mux.wait(&mut ready, Some(timeout)) {
                tracing::error!(error = %e, "event wait failed, retrying");
                std::thread::sleep(WAIT_RETRY_BACKOFF);
                continue;
            }
            merge_pending(&mut ready, &mut pending);

            for context in ready.drain(..) {
                if self.cancel.is_cancelled() {
                    break;
                }
                pool.dispatch(context);
            }
            pool.wait_batch();
        }

        pool.shutdown();
        for server in &self.servers {
            server.shutdown();
        }
        tracing::info!("dispatcher stopped");
        Ok(())
    }

    /// Request termination and interrupt the current wait
    pub fn stop(&self) {
        self.handle().stop();
    }
}

/// Process one ready socket
///
/// Returns the context again when the session stopped at its read cap.
pub(crate) fn process_event(context: EventContext) -> Option<EventContext> {
    match context {
        EventContext::Listener(listener) => {
            listener.accept_loop();
            None
        }
        EventContext::Session(session) => match session.receive() {
            ReceiveStatus::MoreDataPending => Some(EventContext::Session(session)),
            _ => None,
        },
    }
}

/// Append pending contexts not already reported ready
///
/// A session must never appear twice in one batch.
fn merge_pending(ready: &mut Vec<EventContext>, pending: &mut Vec<EventContext>) {
    for context in pending.drain(..) {
        if !ready.iter().any(|r| r.same_source(&context)) {
            ready.push(context);
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod dispatcher_test;
