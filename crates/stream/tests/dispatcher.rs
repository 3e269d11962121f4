//! Integration tests for the envelope dispatcher.
//!
//! Exercise subscription bookkeeping, batch unwrapping, log buffering,
//! and the per-handler error isolation -- all without a socket.

use std::sync::{Arc, Mutex};

use shelfsync_stream::{parse_envelope, Dispatcher, Envelope, EventTag, SubscriptionToken};

fn status_frame(id: &str, status: &str, progress: u8) -> String {
    format!(r#"{{"type":"status","job_id":"{id}","status":"{status}","progress":{progress}}}"#)
}

fn log_frame(line: &str) -> Envelope {
    parse_envelope(&format!(r#"{{"type":"log","line":"{line}"}}"#)).unwrap()
}

/// Shared recorder: collects a label per handler invocation.
fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> shelfsync_stream::Handler) {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_for_factory = Arc::clone(&seen);
    let factory = move |label: &str| -> shelfsync_stream::Handler {
        let seen = Arc::clone(&seen_for_factory);
        let label = label.to_string();
        Arc::new(move |_envelopes: &[Envelope]| {
            seen.lock().unwrap().push(label.clone());
            Ok(())
        })
    };
    (seen, factory)
}

// ---------------------------------------------------------------------------
// Test: handlers run in registration order
// ---------------------------------------------------------------------------

#[test]
fn handlers_run_in_registration_order() {
    let dispatcher = Dispatcher::new();
    let (seen, handler) = recorder();

    dispatcher.subscribe(EventTag::Status, handler("first"));
    dispatcher.subscribe(EventTag::Status, handler("second"));
    dispatcher.subscribe(EventTag::Status, handler("third"));

    dispatcher.dispatch_frame(&status_frame("j1", "running", 10));

    assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
}

// ---------------------------------------------------------------------------
// Test: a batch of N inner envelopes yields N + 1 invocations, in order
// ---------------------------------------------------------------------------

#[test]
fn batch_dispatches_unit_then_each_inner_in_order() {
    let dispatcher = Dispatcher::new();
    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let order_batch = Arc::clone(&order);
    dispatcher.subscribe(
        EventTag::Batch,
        Arc::new(move |envelopes: &[Envelope]| {
            assert_eq!(envelopes.len(), 1);
            assert!(matches!(envelopes[0], Envelope::Batch(_)));
            order_batch.lock().unwrap().push("batch".into());
            Ok(())
        }),
    );

    let order_status = Arc::clone(&order);
    dispatcher.subscribe(
        EventTag::Status,
        Arc::new(move |envelopes: &[Envelope]| {
            for envelope in envelopes {
                if let Envelope::Status(event) = envelope {
                    order_status.lock().unwrap().push(event.job_id.clone());
                }
            }
            Ok(())
        }),
    );

    let frame = format!(
        r#"{{"type":"batch","count":3,"events":[{},{},{}]}}"#,
        status_frame("a", "queued", 0),
        status_frame("b", "running", 40),
        status_frame("c", "running", 80),
    );
    dispatcher.dispatch_frame(&frame);

    assert_eq!(*order.lock().unwrap(), vec!["batch", "a", "b", "c"]);
}

// ---------------------------------------------------------------------------
// Test: log envelopes are buffered until flush, then delivered as one group
// ---------------------------------------------------------------------------

#[test]
fn logs_are_buffered_and_flushed_as_a_group() {
    let dispatcher = Dispatcher::new();
    let groups: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));

    let groups_handler = Arc::clone(&groups);
    dispatcher.subscribe(
        EventTag::Log,
        Arc::new(move |envelopes: &[Envelope]| {
            let lines = envelopes
                .iter()
                .filter_map(|envelope| match envelope {
                    Envelope::Log(event) => Some(event.line.clone()),
                    _ => None,
                })
                .collect();
            groups_handler.lock().unwrap().push(lines);
            Ok(())
        }),
    );

    dispatcher.dispatch(&log_frame("line one"));
    dispatcher.dispatch(&log_frame("line two"));

    // Nothing delivered before the flush.
    assert!(groups.lock().unwrap().is_empty());
    assert_eq!(dispatcher.buffered_log_count(), 2);

    dispatcher.flush_logs();

    assert_eq!(
        *groups.lock().unwrap(),
        vec![vec!["line one".to_string(), "line two".to_string()]]
    );
    assert_eq!(dispatcher.buffered_log_count(), 0);

    // An empty flush delivers nothing.
    dispatcher.flush_logs();
    assert_eq!(groups.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: a handler may unsubscribe itself during its own invocation
// ---------------------------------------------------------------------------

#[test]
fn handler_can_unsubscribe_itself_during_dispatch() {
    let dispatcher = Arc::new(Dispatcher::new());
    let calls = Arc::new(Mutex::new(0usize));
    let token_slot: Arc<Mutex<Option<SubscriptionToken>>> = Arc::new(Mutex::new(None));

    let dispatcher_inner = Arc::clone(&dispatcher);
    let calls_inner = Arc::clone(&calls);
    let token_inner = Arc::clone(&token_slot);
    let token = dispatcher.subscribe(
        EventTag::Status,
        Arc::new(move |_envelopes: &[Envelope]| {
            *calls_inner.lock().unwrap() += 1;
            if let Some(token) = token_inner.lock().unwrap().take() {
                dispatcher_inner.unsubscribe(token);
            }
            Ok(())
        }),
    );
    *token_slot.lock().unwrap() = Some(token);

    dispatcher.dispatch_frame(&status_frame("j1", "running", 1));
    dispatcher.dispatch_frame(&status_frame("j1", "running", 2));

    // Invoked for the first dispatch only; removal takes effect for
    // every later dispatch and must not panic.
    assert_eq!(*calls.lock().unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Test: one failing handler does not block the others
// ---------------------------------------------------------------------------

#[test]
fn failing_handler_does_not_block_others() {
    let dispatcher = Dispatcher::new();
    let (seen, handler) = recorder();

    dispatcher.subscribe(
        EventTag::Status,
        Arc::new(|_envelopes: &[Envelope]| anyhow::bail!("subscriber bug")),
    );
    dispatcher.subscribe(EventTag::Status, handler("survivor"));

    dispatcher.dispatch_frame(&status_frame("j1", "running", 5));

    assert_eq!(*seen.lock().unwrap(), vec!["survivor"]);
}

// ---------------------------------------------------------------------------
// Test: malformed and unknown frames are dropped without dispatch
// ---------------------------------------------------------------------------

#[test]
fn malformed_and_unknown_frames_are_dropped() {
    let dispatcher = Dispatcher::new();
    let (seen, handler) = recorder();
    dispatcher.subscribe(EventTag::Status, handler("status"));

    dispatcher.dispatch_frame("{ this is not json");
    dispatcher.dispatch_frame(r#"{"type":"telemetry","payload":1}"#);

    assert!(seen.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: unsubscribing an unknown token is a no-op
// ---------------------------------------------------------------------------

#[test]
fn unsubscribe_is_idempotent() {
    let dispatcher = Dispatcher::new();
    let (seen, handler) = recorder();

    let token = dispatcher.subscribe(EventTag::Error, handler("errors"));
    dispatcher.unsubscribe(token);
    dispatcher.unsubscribe(token);

    dispatcher.dispatch_frame(r#"{"type":"error","message":"boom"}"#);
    assert!(seen.lock().unwrap().is_empty());
}
