//! Tests for both readiness facilities

use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::framing::FramingConfig;
use crate::multiplexer::{self, EventContext, MultiplexerKind};
use crate::test_util::{Harness, loopback_config, send};

const KINDS: [MultiplexerKind; 2] = [MultiplexerKind::Epoll, MultiplexerKind::Poll];

fn wait_for_ready(harness: &Harness) -> Vec<EventContext> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut ready = Vec::new();
    while ready.is_empty() && Instant::now() < deadline {
        harness
            .mux
            .wait(&mut ready, Some(Duration::from_millis(50)))
            .unwrap();
    }
    ready
}

#[test]
fn test_create_honours_preference() {
    let mux = multiplexer::create(MultiplexerKind::Poll).unwrap();
    assert_eq!(mux.kind(), MultiplexerKind::Poll);

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        let mux = multiplexer::create(MultiplexerKind::Epoll).unwrap();
        assert_eq!(mux.kind(), MultiplexerKind::Epoll);
    }
}

#[test]
fn test_wait_times_out_when_idle() {
    for kind in KINDS {
        let harness = Harness::start_with(kind, loopback_config(FramingConfig::default()));
        let mut ready = Vec::new();
        let started = Instant::now();
        harness
            .mux
            .wait(&mut ready, Some(Duration::from_millis(50)))
            .unwrap();
        assert!(ready.is_empty(), "{kind}");
        assert!(started.elapsed() >= Duration::from_millis(40), "{kind}");
    }
}

#[test]
fn test_listener_and_session_readiness() {
    for kind in KINDS {
        let harness = Harness::start_with(kind, loopback_config(FramingConfig::default()));
        let mut client = harness.connect();

        let ready = wait_for_ready(&harness);
        assert!(
            matches!(ready.as_slice(), [EventContext::Listener(_)]),
            "{kind}: {ready:?}"
        );
        let EventContext::Listener(listener) = &ready[0] else {
            unreachable!()
        };
        assert_eq!(listener.accept_loop(), 1);
        assert_eq!(harness.mux.registered(), 2);

        send(&mut client, b"<13>ping\n");
        let ready = wait_for_ready(&harness);
        let session = ready
            .iter()
            .find_map(|c| match c {
                EventContext::Session(s) => Some(Arc::clone(s)),
                EventContext::Listener(_) => None,
            })
            .unwrap_or_else(|| panic!("{kind}: no session ready"));
        session.receive();
        assert_eq!(harness.submitter.frames()[0].as_ref(), b"<13>ping");
    }
}

#[test]
fn test_deregistered_session_is_not_reported() {
    for kind in KINDS {
        let harness = Harness::start_with(kind, loopback_config(FramingConfig::default()));
        let mut client = harness.connect_session();
        let session = harness.server.sessions().pop().unwrap();

        session.close();
        assert_eq!(harness.mux.registered(), 1, "{kind}");

        let _ = std::io::Write::write_all(&mut client, b"late\n");
        let mut ready = Vec::new();
        harness
            .mux
            .wait(&mut ready, Some(Duration::from_millis(100)))
            .unwrap();
        assert!(
            ready.iter().all(|c| matches!(c, EventContext::Listener(_))),
            "{kind}: {ready:?}"
        );
        assert!(harness.submitter.frames().is_empty());
    }
}

#[test]
fn test_wake_interrupts_blocking_wait() {
    for kind in KINDS {
        let mux = multiplexer::create(kind).unwrap();
        let waiter = Arc::clone(&mux);
        let started = Instant::now();
        let handle = std::thread::spawn(move || {
            let mut ready = Vec::new();
            waiter.wait(&mut ready, Some(Duration::from_secs(30))).unwrap();
            ready.len()
        });

        std::thread::sleep(Duration::from_millis(50));
        mux.wake().unwrap();

        assert_eq!(handle.join().unwrap(), 0, "{kind}");
        assert!(started.elapsed() < Duration::from_secs(10), "{kind}");
    }
}

#[test]
fn test_accept_does_not_cut_next_wait_short() {
    for kind in KINDS {
        let harness = Harness::start_with(kind, loopback_config(FramingConfig::default()));
        let _client = harness.connect_session();

        let mut ready = Vec::new();
        let started = Instant::now();
        harness
            .mux
            .wait(&mut ready, Some(Duration::from_millis(50)))
            .unwrap();
        assert!(ready.is_empty(), "{kind}: {ready:?}");
        assert!(started.elapsed() >= Duration::from_millis(40), "{kind}");
    }
}

#[test]
fn test_register_wakes_blocked_poll_waiter() {
    let harness = Harness::start_with(
        MultiplexerKind::Poll,
        loopback_config(FramingConfig::default()),
    );
    let waiter = Arc::clone(&harness.mux);
    let started = Instant::now();
    let handle = std::thread::spawn(move || {
        let mut ready = Vec::new();
        waiter.wait(&mut ready, Some(Duration::from_secs(30))).unwrap();
        ready.len()
    });
    std::thread::sleep(Duration::from_millis(50));

    let (idle, _peer) = UnixStream::pair().unwrap();
    let listener = harness.server.listeners().pop().unwrap();
    let token = harness
        .mux
        .register(idle.as_raw_fd(), EventContext::Listener(listener))
        .unwrap();

    assert_eq!(handle.join().unwrap(), 0);
    assert!(started.elapsed() < Duration::from_secs(10));
    harness.mux.deregister(token, idle.as_raw_fd()).unwrap();
}
