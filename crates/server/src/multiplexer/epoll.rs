use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use super::{EventContext, EventMultiplexer, EventToken, MultiplexerKind};

/// Events fetched per wait
const EVENT_CAPACITY: usize = 1024;

const WAKE_TOKEN: Token = Token(0);

/// Edge-triggered readiness via `mio`
pub struct EpollMultiplexer {
    /// Poll and its event buffer; only `wait` locks this
    poll: Mutex<(Poll, Events)>,
    registry: Registry,
    waker: Waker,
    contexts: Mutex<HashMap<Token, EventContext>>,
    next_token: AtomicUsize,
}

impl EpollMultiplexer {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        Ok(Self {
            poll: Mutex::new((poll, Events::with_capacity(EVENT_CAPACITY))),
            registry,
            waker,
            contexts: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(WAKE_TOKEN.0 + 1),
        })
    }
}

impl EventMultiplexer for EpollMultiplexer {
    fn register(&self, fd: RawFd, context: EventContext) -> io::Result<EventToken> {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.contexts.lock().insert(token, context);

        if let Err(e) = self
            .registry
            .register(&mut SourceFd(&fd), token, Interest::READABLE)
        {
            self.contexts.lock().remove(&token);
            return Err(e);
        }
        Ok(EventToken(token.0))
    }

    fn deregister(&self, token: EventToken, fd: RawFd) -> io::Result<()> {
        let result = self.registry.deregister(&mut SourceFd(&fd));
        self.contexts.lock().remove(&Token(token.0));
        result
    }

    fn wait(&self, ready: &mut Vec<EventContext>, timeout: Option<Duration>) -> io::Result<()> {
        let mut guard = self.poll.lock();
        let (poll, events) = &mut *guard;

        match poll.poll(events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let contexts = self.contexts.lock();
        for event in events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                continue;
            }
            // stale events for deregistered sockets are skipped
            if let Some(context) = contexts.get(&token) {
                ready.push(context.clone());
            }
        }
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }

    fn kind(&self) -> MultiplexerKind {
        MultiplexerKind::Epoll
    }

    fn registered(&self) -> usize {
        self.contexts.lock().len()
    }
}
