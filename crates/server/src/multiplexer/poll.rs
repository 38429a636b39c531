use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{EventContext, EventMultiplexer, EventToken, MultiplexerKind};

const READY_MASK: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR;

/// Level-triggered readiness via `poll(2)`
///
/// Rebuilds the descriptor array on every wait. Wakeups go through a
/// non-blocking socket pair whose read end is always polled first.
/// Registering only wakes a thread that is inside `wait`; the next wait picks
/// the new descriptor up on its own.
pub struct PollMultiplexer {
    entries: Mutex<BTreeMap<usize, (RawFd, EventContext)>>,
    next_token: AtomicUsize,
    waiting: AtomicBool,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
}

impl PollMultiplexer {
    pub fn new() -> io::Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;
        Ok(Self {
            entries: Mutex::new(BTreeMap::new()),
            next_token: AtomicUsize::new(1),
            waiting: AtomicBool::new(false),
            wake_rx,
            wake_tx,
        })
    }

    fn drain_wakeups(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = (&self.wake_rx).read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            // round up so a sub-millisecond timeout doesn't spin
            let ms = t.as_nanos().div_ceil(1_000_000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

impl EventMultiplexer for PollMultiplexer {
    fn register(&self, fd: RawFd, context: EventContext) -> io::Result<EventToken> {
        if fd < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid file descriptor",
            ));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(token, (fd, context));
        // a blocked waiter polls a stale descriptor set
        if self.waiting.load(Ordering::SeqCst)
            && let Err(e) = self.wake()
        {
            tracing::debug!(fd, error = %e, "failed to wake poll waiter");
        }
        Ok(EventToken(token))
    }

    fn deregister(&self, token: EventToken, _fd: RawFd) -> io::Result<()> {
        self.entries.lock().remove(&token.0);
        Ok(())
    }

    fn wait(&self, ready: &mut Vec<EventContext>, timeout: Option<Duration>) -> io::Result<()> {
        // Set before the snapshot: a register that misses it sees the flag
        self.waiting.store(true, Ordering::SeqCst);
        let (tokens, mut fds): (Vec<usize>, Vec<libc::pollfd>) = {
            let entries = self.entries.lock();
            std::iter::once((
                0,
                libc::pollfd {
                    fd: self.wake_rx.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ))
            .chain(entries.iter().map(|(token, (fd, _))| {
                (
                    *token,
                    libc::pollfd {
                        fd: *fd,
                        events: libc::POLLIN,
                        revents: 0,
                    },
                )
            }))
            .unzip()
        };

        // SAFETY: `fds` is a valid, exclusively borrowed array of `fds.len()` pollfds.
        let rc = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };
        self.waiting.store(false, Ordering::SeqCst);
        if rc < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }
        if rc == 0 {
            return Ok(());
        }

        if fds[0].revents != 0 {
            self.drain_wakeups();
        }

        let entries = self.entries.lock();
        for (token, pollfd) in tokens.iter().zip(&fds).skip(1) {
            if pollfd.revents & (READY_MASK | libc::POLLNVAL) == 0 {
                continue;
            }
            if let Some((_, context)) = entries.get(token) {
                ready.push(context.clone());
            }
        }
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        match (&self.wake_tx).write(&[1]) {
            Ok(_) => Ok(()),
            // pipe already full: a wakeup is pending anyway
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn kind(&self) -> MultiplexerKind {
        MultiplexerKind::Poll
    }

    fn registered(&self) -> usize {
        self.entries.lock().len()
    }
}
