//! Tests for the readiness dispatcher

use std::time::{Duration, Instant};

use crate::dispatcher::{merge_pending, process_event};
use crate::framing::FramingConfig;
use crate::multiplexer::EventContext;
use crate::test_util::{Harness, loopback_config, send};

/// Wait until the multiplexer reports the harness' only session
fn ready_session(harness: &Harness) -> EventContext {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let mut ready = Vec::new();
        harness
            .mux
            .wait(&mut ready, Some(Duration::from_millis(20)))
            .unwrap();
        if let Some(context) = ready
            .into_iter()
            .find(|c| matches!(c, EventContext::Session(_)))
        {
            return context;
        }
    }
    panic!("session never became ready");
}

#[test]
fn test_session_at_read_cap_is_returned_for_requeue() {
    let mut config = loopback_config(FramingConfig::default());
    config.starvation_max_reads = 1;
    let harness = Harness::start(config);
    let mut client = harness.connect_session();

    send(&mut client, b"<13>a\n");
    let context = ready_session(&harness);

    let again = process_event(context).expect("session stopped at its read cap");
    assert!(matches!(again, EventContext::Session(_)));
    assert_eq!(harness.submitter.len(), 1);

    // Nothing left in the socket
    assert!(process_event(again).is_none());
    assert_eq!(harness.server.session_count(), 1);
}

#[test]
fn test_uncapped_session_is_not_requeued() {
    let mut config = loopback_config(FramingConfig::default());
    config.starvation_max_reads = 0;
    let harness = Harness::start(config);
    let mut client = harness.connect_session();

    send(&mut client, b"<13>a\n<13>b\n");
    let context = ready_session(&harness);
    assert!(process_event(context).is_none());
}

#[test]
fn test_merge_pending_skips_already_ready() {
    let harness = Harness::start(loopback_config(FramingConfig::default()));
    let _client = harness.connect_session();
    let session = EventContext::Session(harness.server.sessions().pop().unwrap());
    let listener = EventContext::Listener(harness.server.listeners().pop().unwrap());

    let mut ready = vec![session.clone()];
    let mut pending = vec![session.clone(), listener];
    merge_pending(&mut ready, &mut pending);

    assert!(pending.is_empty());
    assert_eq!(ready.len(), 2);
    assert!(ready[0].same_source(&session));
    assert!(matches!(ready[1], EventContext::Listener(_)));
}
