// tests/integration/operations_test.rs

//! Integration tests for operation routing
//! Tests: queueing, dispatch, retries, timeouts, redirects, shutdown

use super::test_helpers::*;
use esconn::Connection;
use esconn::core::ConnectionError;
use esconn::core::actor::{ConnectingPhase, ConnectionState};
use esconn::core::events::ConnectionEvent;
use esconn::core::inspection::InspectionResult;
use esconn::core::operations::RequestOperation;
use esconn::core::operations::request::RequestResult;
use esconn::core::protocol::{TcpCommand, TcpPackage};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

const NO_TIMEOUT: Duration = Duration::ZERO;

/// A connection stuck in `ConnectionEstablishing` on a manual transport.
async fn establishing(
    settings: esconn::config::ConnectionSettings,
) -> (Connection, Arc<MockTransportFactory>) {
    init_tracing();
    let factory = MockTransportFactory::new(MockBehavior::Manual);
    let connection = Connection::with_transport(settings, factory.clone());
    connection
        .connect(FixedDiscoverer::new(endpoint(1113)))
        .await
        .unwrap();
    wait_until(&connection, |s| {
        s.phase == ConnectingPhase::ConnectionEstablishing
    })
    .await;
    (connection, factory)
}

fn read_event() -> (RequestOperation, oneshot::Receiver<RequestResult>) {
    RequestOperation::new(TcpCommand::ReadEvent, TcpCommand::ReadEventCompleted, "stream-1")
}

#[tokio::test(start_paused = true)]
async fn test_operation_before_connect_fails_not_active() {
    init_tracing();
    let factory = MockTransportFactory::new(MockBehavior::AutoConnect);
    let connection = Connection::with_transport(test_settings(), factory);

    let (operation, log) =
        ScriptedOperation::new(TcpCommand::ReadEvent, |_| InspectionResult::end_operation("done"));
    connection.start_operation(Box::new(operation), 3, NO_TIMEOUT);
    connection.stats().await.unwrap();

    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(&failures[0], ConnectionError::NotActive(name) if name == "test"));
}

#[tokio::test(start_paused = true)]
async fn test_operation_while_connecting_is_sent_once_connected() {
    let (connection, factory) = establishing(test_settings()).await;
    let (operation, _result) = read_event();
    connection.start_operation(Box::new(operation), 3, NO_TIMEOUT);

    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.waiting_operations, 1);
    assert_eq!(stats.active_operations, 0);
    let transport = factory.last();
    assert!(transport.sent().is_empty());

    transport.connect();
    let stats = wait_for_state(&connection, ConnectionState::Connected).await;
    assert_eq!(stats.waiting_operations, 0);
    assert_eq!(stats.active_operations, 1);
    assert_eq!(transport.sent_with(TcpCommand::ReadEvent).len(), 1);

    // The periodic check must not send it a second time.
    advance(&connection, Duration::from_millis(1100)).await;
    assert_eq!(transport.sent_with(TcpCommand::ReadEvent).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_operation_completes_and_stops_being_tracked() {
    let (connection, factory, _events) = connected(test_settings()).await;
    let transport = factory.last();
    let (operation, result) = read_event();
    connection.start_operation(Box::new(operation), 3, NO_TIMEOUT);
    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.active_operations, 1);

    let request = transport.last_sent().unwrap();
    assert_eq!(request.command, TcpCommand::ReadEvent);
    assert_eq!(&request.payload[..], b"stream-1");

    transport.reply_to_last(TcpCommand::ReadEventCompleted, "event-data");
    let response = result.await.unwrap().unwrap();
    assert_eq!(response.correlation_id, request.correlation_id);
    assert_eq!(&response.payload[..], b"event-data");

    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.active_operations, 0);

    // A late duplicate is counted but routed nowhere.
    transport.receive(TcpPackage::new(
        TcpCommand::ReadEventCompleted,
        request.correlation_id,
        "again",
    ));
    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.package_number, 2);
    assert_eq!(stats.state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_request_helper_round_trip() {
    let (connection, factory, _events) = connected(test_settings()).await;
    let transport = factory.last();

    let request = connection.request(TcpCommand::ReadEvent, TcpCommand::ReadEventCompleted, "s");
    let reply = async {
        wait_until(&connection, |s| s.active_operations == 1).await;
        transport.reply_to_last(TcpCommand::ReadEventCompleted, "ok");
    };
    let (response, ()) = tokio::join!(request, reply);
    assert_eq!(&response.unwrap().payload[..], b"ok");
}

#[tokio::test(start_paused = true)]
async fn test_not_handled_retries_until_the_limit() {
    let (connection, factory, _events) = connected(test_settings()).await;
    let transport = factory.last();
    let (operation, log) =
        ScriptedOperation::new(TcpCommand::ReadEvent, |_| InspectionResult::retry("NotHandled"));
    connection.start_operation(Box::new(operation), 2, NO_TIMEOUT);

    for _ in 0..3 {
        connection.stats().await.unwrap();
        transport.reply_to_last(TcpCommand::NotHandled, "");
    }
    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.active_operations, 0);
    assert_eq!(stats.waiting_operations, 0);

    let sent = transport.sent_with(TcpCommand::ReadEvent);
    assert_eq!(sent.len(), 3);
    // Every attempt gets its own correlation id.
    assert_ne!(sent[0].correlation_id, sent[1].correlation_id);
    assert_ne!(sent[1].correlation_id, sent[2].correlation_id);

    assert_eq!(log.inspected_count(), 3);
    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0],
        ConnectionError::RetriesLimitReached { retries: 2, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_operation_is_retried_then_fails() {
    let (connection, factory, _events) = connected(test_settings()).await;
    let transport = factory.last();
    let (operation, log) =
        ScriptedOperation::new(TcpCommand::ReadEvent, |_| InspectionResult::end_operation("done"));
    connection.start_operation(Box::new(operation), 1, Duration::from_millis(500));
    connection.stats().await.unwrap();
    assert_eq!(transport.sent_with(TcpCommand::ReadEvent).len(), 1);

    // First timeout check at 1s.
    advance(&connection, Duration::from_millis(1100)).await;
    assert_eq!(transport.sent_with(TcpCommand::ReadEvent).len(), 2);
    assert!(log.failures().is_empty());

    advance(&connection, Duration::from_millis(1000)).await;
    assert_eq!(transport.sent_with(TcpCommand::ReadEvent).len(), 2);
    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0],
        ConnectionError::RetriesLimitReached { retries: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_operation_fails_when_configured() {
    let mut settings = test_settings();
    settings.fail_on_no_server_response = true;
    let (connection, factory, _events) = connected(settings).await;
    let transport = factory.last();
    let (operation, log) =
        ScriptedOperation::new(TcpCommand::ReadEvent, |_| InspectionResult::end_operation("done"));
    connection.start_operation(Box::new(operation), 5, Duration::from_millis(500));

    let stats = advance(&connection, Duration::from_millis(1100)).await;
    assert_eq!(stats.active_operations, 0);
    assert_eq!(transport.sent_with(TcpCommand::ReadEvent).len(), 1);
    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(&failures[0], ConnectionError::OperationTimedOut(_)));
}

#[tokio::test(start_paused = true)]
async fn test_bad_request_for_one_operation_only_fails_that_operation() {
    let (connection, factory, _events) = connected(test_settings()).await;
    let transport = factory.last();
    let (operation, result) = read_event();
    connection.start_operation(Box::new(operation), 3, NO_TIMEOUT);
    connection.stats().await.unwrap();

    transport.reply_to_last(TcpCommand::BadRequest, "no such stream");
    let error = result.await.unwrap().unwrap_err();
    assert!(matches!(error, ConnectionError::BadRequest(text) if text == "no such stream"));

    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.state, ConnectionState::Connected);
    assert!(!transport.was_closed());
}

#[tokio::test(start_paused = true)]
async fn test_close_fails_every_tracked_operation() {
    let (connection, factory) = establishing(test_settings()).await;
    let (waiting, waiting_result) = read_event();
    connection.start_operation(Box::new(waiting), 3, NO_TIMEOUT);
    factory.last().connect();
    wait_for_state(&connection, ConnectionState::Connected).await;

    let (active, active_result) = read_event();
    connection.start_operation(Box::new(active), 3, NO_TIMEOUT);
    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.active_operations, 2);

    connection.close("done");
    assert!(matches!(
        waiting_result.await.unwrap(),
        Err(ConnectionError::ConnectionClosed(_))
    ));
    assert!(matches!(
        active_result.await.unwrap(),
        Err(ConnectionError::ConnectionClosed(_))
    ));

    let (late, late_result) = read_event();
    connection.start_operation(Box::new(late), 3, NO_TIMEOUT);
    assert!(matches!(
        late_result.await.unwrap(),
        Err(ConnectionError::Closed(name)) if name == "test"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_decision_moves_to_the_new_endpoint() {
    let (connection, factory, mut events) = connected(test_settings()).await;
    let leader = endpoint(2113);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (operation, log) = ScriptedOperation::new(TcpCommand::WriteEvents, move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            InspectionResult::reconnect("NotLeader", Some(leader))
        } else {
            InspectionResult::end_operation("done")
        }
    });
    connection.start_operation(Box::new(operation), 3, NO_TIMEOUT);
    connection.stats().await.unwrap();

    let first = factory.transport(0);
    first.reply_to_last(TcpCommand::NotHandled, "");
    let stats = wait_until(&connection, |s| {
        s.state == ConnectionState::Connected && s.remote_endpoint == Some(leader)
    })
    .await;
    assert_eq!(stats.active_operations, 1);

    assert!(first.was_closed());
    assert_eq!(factory.count(), 2);
    let second = factory.transport(1);
    let resent = second.sent_with(TcpCommand::WriteEvents);
    assert_eq!(resent.len(), 1);

    second.reply_to_last(TcpCommand::WriteEventsCompleted, "");
    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.active_operations, 0);
    assert!(log.failures().is_empty());

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(e, ConnectionEvent::Disconnected(ep) if *ep == endpoint(1113))));
    assert!(events.iter().any(|e| matches!(e, ConnectionEvent::Connected(ep) if *ep == leader)));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_to_the_current_endpoint_just_retries() {
    let (connection, factory, _events) = connected(test_settings()).await;
    let current = endpoint(1113);
    let (operation, _log) = ScriptedOperation::new(TcpCommand::WriteEvents, move |_| {
        InspectionResult::reconnect("NotLeader", Some(current))
    });
    connection.start_operation(Box::new(operation), 3, NO_TIMEOUT);
    connection.stats().await.unwrap();

    let transport = factory.last();
    transport.reply_to_last(TcpCommand::NotHandled, "");
    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.state, ConnectionState::Connected);
    assert_eq!(factory.count(), 1);
    assert!(!transport.was_closed());
    assert_eq!(transport.sent_with(TcpCommand::WriteEvents).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_without_endpoint_closes_the_connection() {
    let (connection, factory, mut events) = connected(test_settings()).await;
    let (operation, log) = ScriptedOperation::new(TcpCommand::WriteEvents, |_| {
        InspectionResult::reconnect("NotLeader", None)
    });
    connection.start_operation(Box::new(operation), 3, NO_TIMEOUT);
    connection.stats().await.unwrap();

    factory.last().reply_to_last(TcpCommand::NotHandled, "");
    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.state, ConnectionState::Closed);

    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(&failures[0], ConnectionError::ConnectionClosed(_)));

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        ConnectionEvent::Closed(reason)
            if reason == "No end point is specified while trying to reconnect."
    )));
}

#[tokio::test(start_paused = true)]
async fn test_subscribed_decision_from_an_operation_is_fatal() {
    let (connection, factory, mut events) = connected(test_settings()).await;
    let (operation, log) =
        ScriptedOperation::new(TcpCommand::ReadEvent, |_| InspectionResult::subscribed("oops"));
    connection.start_operation(Box::new(operation), 3, NO_TIMEOUT);
    connection.stats().await.unwrap();

    factory.last().reply_to_last(TcpCommand::ReadEventCompleted, "");
    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.state, ConnectionState::Closed);
    assert_eq!(log.failures().len(), 1);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(e, ConnectionEvent::ErrorOccurred(ConnectionError::InvalidDecision(_)))));
    assert!(events.iter().any(|e| matches!(e, ConnectionEvent::Closed(_))));
}

#[tokio::test(start_paused = true)]
async fn test_waiting_queue_is_bounded() {
    let mut settings = test_settings();
    settings.max_queue_size = 2;
    let (connection, _factory) = establishing(settings).await;

    let mut logs = Vec::new();
    for _ in 0..3 {
        let (operation, log) =
            ScriptedOperation::new(TcpCommand::ReadEvent, |_| InspectionResult::end_operation("done"));
        connection.start_operation(Box::new(operation), 3, NO_TIMEOUT);
        logs.push(log);
    }
    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.waiting_operations, 2);

    assert!(logs[0].failures().is_empty());
    assert!(logs[1].failures().is_empty());
    let failures = logs[2].failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(&failures[0], ConnectionError::QueueFull(2)));
}

#[tokio::test(start_paused = true)]
async fn test_operations_survive_a_dropped_transport() {
    let (connection, factory, _events) = connected(test_settings()).await;
    let (operation, log) =
        ScriptedOperation::new(TcpCommand::ReadEvent, |_| InspectionResult::end_operation("done"));
    connection.start_operation(Box::new(operation), 3, NO_TIMEOUT);
    connection.stats().await.unwrap();

    factory.transport(0).drop_connection();
    let stats = connection.stats().await.unwrap();
    assert_eq!(stats.state, ConnectionState::Connecting);
    assert_eq!(stats.active_operations, 1);

    // The reconnection delay elapses by the next tick.
    let stats = wait_until_after_tick(&connection).await;
    assert_eq!(stats.state, ConnectionState::Connected);
    assert_eq!(factory.count(), 2);
    assert_eq!(factory.transport(1).sent_with(TcpCommand::ReadEvent).len(), 1);
    assert_eq!(stats.active_operations, 1);
    assert!(log.failures().is_empty());
}

async fn wait_until_after_tick(connection: &Connection) -> esconn::core::actor::ConnectionStats {
    advance(connection, Duration::from_millis(250)).await;
    wait_for_state(connection, ConnectionState::Connected).await
}
