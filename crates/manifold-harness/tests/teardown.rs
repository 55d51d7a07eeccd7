//! Deferred close and cleanup semantics.

use manifold_core::{
    ChannelError, ChannelKind, ConnectionManager, Endpoint, HandlerSpec, Lifecycle, ManagerConfig,
};
use manifold_harness::{PlainHandler, RecordingHandler, ScriptedFactory, VirtualSelector, shared_log};

fn setup() -> (ConnectionManager<VirtualSelector>, ScriptedFactory) {
    let factory = ScriptedFactory::new();
    let manager = ConnectionManager::new(
        VirtualSelector::new(),
        Box::new(factory.clone()),
        ManagerConfig::default(),
    );
    (manager, factory)
}

fn stream() -> Endpoint {
    Endpoint::Port(5555)
}

fn queue() -> Endpoint {
    Endpoint::SocketType("dealer".to_string())
}

#[test]
fn cleanup_with_no_requests_changes_nothing() {
    let (mut manager, _factory) = setup();
    let id = manager.bind("127.0.0.1", &stream(), HandlerSpec::Default).unwrap();
    manager.process();

    manager.cleanup();
    manager.cleanup();
    assert!(manager.is_connected(id));
    assert_eq!(manager.connection_count(), 1);
}

#[test]
fn flush_close_waits_for_the_outbound_buffer() {
    let (mut manager, factory) = setup();
    let log = shared_log();
    let handler = RecordingHandler::new(log.clone());
    let id =
        manager.connect("tcp://broker", &queue(), HandlerSpec::Existing(Box::new(handler))).unwrap();
    manager.process();

    let script = factory.script(0).unwrap();
    script.buffer_outbound(b"unsent");

    manager.close_connection(id, true, None);
    assert!(manager.is_connected(id));

    manager.cleanup();
    // Still draining: the connection survives and the request is requeued.
    assert!(manager.is_connected(id));
    assert_eq!(manager.closing_count(), 1);
    assert_eq!(log.borrow().reasons.len(), 1);
    assert!(!script.released());

    script.clear_outbound();
    manager.cleanup();
    assert_eq!(manager.state_of(id), None);
    assert!(!manager.is_connected(id));
    assert!(script.released());
    // The hook runs again on the pass that finally releases.
    assert_eq!(log.borrow().reasons.len(), 2);
}

#[test]
fn stuck_flush_close_is_requeued_once_per_pass() {
    let (mut manager, factory) = setup();
    let id = manager.bind("127.0.0.1", &stream(), HandlerSpec::Default).unwrap();
    manager.process();
    factory.script(0).unwrap().buffer_outbound(b"stuck");

    manager.close_connection(id, true, None);
    for _ in 0..5 {
        manager.cleanup();
        assert_eq!(manager.closing_count(), 1);
    }
    assert!(manager.is_connected(id));
}

#[test]
fn dispatch_failure_closes_with_the_channel_error() {
    let (mut manager, factory) = setup();
    let log = shared_log();
    let handler = RecordingHandler::new(log.clone());
    let id =
        manager.bind("127.0.0.1", &stream(), HandlerSpec::Existing(Box::new(handler))).unwrap();
    manager.process();

    let script = factory.script(0).unwrap();
    script.fail_next_process("broken pipe");
    manager.selector_mut().mark_ready(id);
    manager.process();

    assert!(manager.has_close_request(id));
    manager.cleanup();
    assert_eq!(manager.state_of(id), None);
    assert_eq!(log.borrow().reasons, vec![Some(ChannelError::Io("broken pipe".to_string()))]);
}

#[test]
fn reason_less_handlers_still_see_the_teardown() {
    let (mut manager, factory) = setup();
    let log = shared_log();
    let handler = PlainHandler::new(log.clone());
    let id =
        manager.bind("127.0.0.1", &stream(), HandlerSpec::Existing(Box::new(handler))).unwrap();
    manager.process();

    factory.script(0).unwrap().fail_next_process("hangup");
    manager.selector_mut().mark_ready(id);
    manager.process();
    manager.cleanup();

    assert_eq!(log.borrow().plain_unbinds, 1);
    assert_eq!(manager.state_of(id), None);
}

#[test]
fn requested_close_passes_no_reason() {
    let (mut manager, _factory) = setup();
    let log = shared_log();
    let handler = RecordingHandler::new(log.clone());
    let id =
        manager.bind("127.0.0.1", &stream(), HandlerSpec::Existing(Box::new(handler))).unwrap();
    manager.process();

    manager.close_connection(id, false, None);
    assert!(manager.is_connected(id));
    assert_eq!(manager.state_of(id), Some(Lifecycle::Closing));

    manager.cleanup();
    assert_eq!(log.borrow().reasons, vec![None]);
    assert_eq!(manager.state_of(id), None);
}

#[test]
fn failing_unbind_does_not_abort_the_batch() {
    let (mut manager, factory) = setup();
    let failing_log = shared_log();
    let ok_log = shared_log();
    let first = manager
        .bind(
            "127.0.0.1",
            &stream(),
            HandlerSpec::Existing(Box::new(RecordingHandler::failing_unbind(failing_log.clone()))),
        )
        .unwrap();
    let second = manager
        .bind(
            "127.0.0.2",
            &stream(),
            HandlerSpec::Existing(Box::new(RecordingHandler::new(ok_log.clone()))),
        )
        .unwrap();
    manager.process();

    manager.close_connection(first, false, None);
    manager.close_connection(second, false, None);
    manager.cleanup();

    assert_eq!(manager.state_of(first), None);
    assert_eq!(manager.state_of(second), None);
    assert_eq!(failing_log.borrow().reasons.len(), 1);
    assert_eq!(ok_log.borrow().reasons.len(), 1);
    assert!(factory.script(0).unwrap().released());
    assert!(factory.script(1).unwrap().released());
}

#[test]
fn shutdown_closes_active_connections_only() {
    let (mut manager, factory) = setup();
    let active = manager.bind("127.0.0.1", &stream(), HandlerSpec::Default).unwrap();
    manager.process();
    let late = manager.connect("tcp://broker", &queue(), HandlerSpec::Default).unwrap();

    manager.shutdown();

    assert_eq!(manager.state_of(active), None);
    assert!(factory.script(0).unwrap().released());
    // Registered after the last cycle, so it never reached the active set.
    assert_eq!(manager.state_of(late), Some(Lifecycle::Pending));
}

#[test]
fn accepted_peer_spawns_a_fresh_handler_per_connection() {
    let (mut manager, factory) = setup();
    let log = shared_log();
    let log_for_factory = log.clone();
    let listener = manager
        .bind(
            "127.0.0.1",
            &stream(),
            HandlerSpec::Factory(std::sync::Arc::new(move || {
                Box::new(RecordingHandler::new(log_for_factory.clone()))
                    as Box<dyn manifold_core::Handler>
            })),
        )
        .unwrap();
    manager.process();

    let listener_script = factory.script(0).unwrap();
    listener_script.queue_accept(ChannelKind::Stream);
    listener_script.queue_accept(ChannelKind::Stream);
    manager.selector_mut().mark_ready(listener);
    manager.process();
    manager.selector_mut().mark_ready(listener);
    manager.process();
    manager.process();

    assert_eq!(manager.connection_count(), 3);
    assert_eq!(manager.active_ids().len(), 3);

    // Tearing everything down hits the listener's handler and both
    // spawned handlers, all built by the same factory closure.
    manager.shutdown();
    assert_eq!(log.borrow().reasons.len(), 3);
}
