// tests/integration/reconnection_test.rs

//! Integration tests for reconnection
//! Tests: retry limit, unlimited retries, attempt reset, flapping server, discovery hand-off

use super::test_helpers::*;
use async_trait::async_trait;
use esconn::Connection;
use esconn::core::ConnectionError;
use esconn::core::actor::ConnectionState;
use esconn::core::discovery::EndpointDiscoverer;
use esconn::core::events::ConnectionEvent;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Resolves once, then fails every call.
struct OneShotDiscoverer {
    calls: AtomicUsize,
}

#[async_trait]
impl EndpointDiscoverer for OneShotDiscoverer {
    async fn discover(&self, _previous: Option<SocketAddr>) -> Result<SocketAddr, ConnectionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(endpoint(1113))
        } else {
            Err(ConnectionError::EndpointDiscovery("cluster unreachable".to_string()))
        }
    }
}

fn count_reconnecting(events: &[ConnectionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ConnectionEvent::Reconnecting))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_refused_connects_stop_at_the_limit() {
    init_tracing();
    let mut settings = test_settings();
    settings.max_reconnections = 2;
    let factory = MockTransportFactory::new(MockBehavior::Refuse);
    let connection = Connection::with_transport(settings, factory.clone());
    let mut events = connection.events();
    let discoverer = FixedDiscoverer::new(endpoint(1113));
    connection.connect(discoverer.clone()).await.unwrap();

    advance(&connection, Duration::from_millis(1000)).await;
    let stats = wait_for_state(&connection, ConnectionState::Closed).await;
    assert_eq!(stats.state, ConnectionState::Closed);

    // The initial attempt plus two reconnections.
    assert_eq!(factory.count(), 3);
    assert_eq!(discoverer.calls(), 3);

    let events = drain_events(&mut events);
    assert_eq!(count_reconnecting(&events), 2);
    // Nothing ever connected, so nothing was disconnected either.
    assert!(!events.iter().any(|e| matches!(e, ConnectionEvent::Disconnected(_))));
    assert!(matches!(
        events.last(),
        Some(ConnectionEvent::Closed(reason)) if reason == "Reconnection limit reached."
    ));
}

#[tokio::test(start_paused = true)]
async fn test_negative_limit_reconnects_forever() {
    init_tracing();
    let mut settings = test_settings();
    settings.max_reconnections = -1;
    let factory = MockTransportFactory::new(MockBehavior::Refuse);
    let connection = Connection::with_transport(settings, factory.clone());
    connection
        .connect(FixedDiscoverer::new(endpoint(1113)))
        .await
        .unwrap();

    let mut last_attempt = 0;
    for _ in 0..10 {
        let stats = advance(&connection, Duration::from_millis(200)).await;
        assert_eq!(stats.state, ConnectionState::Connecting);
        assert!(stats.reconnection_attempt >= last_attempt);
        last_attempt = stats.reconnection_attempt;
    }
    assert!(last_attempt >= 5, "only {last_attempt} attempts");
    assert!(factory.count() >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_connection_reconnects_and_resets_attempts() {
    let (connection, factory, mut events) = connected(test_settings()).await;
    factory.set_behavior(MockBehavior::Refuse);
    factory.transport(0).drop_connection();

    let stats = advance(&connection, Duration::from_millis(500)).await;
    assert_eq!(stats.state, ConnectionState::Connecting);
    assert!(stats.reconnection_attempt >= 2);

    factory.set_behavior(MockBehavior::AutoConnect);
    advance(&connection, Duration::from_millis(200)).await;
    let stats = wait_for_state(&connection, ConnectionState::Connected).await;
    assert_eq!(stats.remote_endpoint, Some(endpoint(1113)));
    // Connecting alone does not clear the count.
    assert!(stats.reconnection_attempt >= 2);

    // Surviving a full timeout check period does.
    let stats = advance(&connection, Duration::from_millis(1200)).await;
    assert_eq!(stats.state, ConnectionState::Connected);
    assert_eq!(stats.reconnection_attempt, 0);

    let events = drain_events(&mut events);
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            ConnectionEvent::Connected(_) => "connected",
            ConnectionEvent::Disconnected(_) => "disconnected",
            ConnectionEvent::Reconnecting => "reconnecting",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds.first(), Some(&"connected"));
    assert_eq!(kinds.get(1), Some(&"disconnected"));
    assert_eq!(kinds.last(), Some(&"connected"));
    assert_eq!(
        kinds.iter().filter(|k| **k == "disconnected").count(),
        1,
        "refused reconnects must not report further disconnects"
    );
}

#[tokio::test(start_paused = true)]
async fn test_server_dropping_every_connection_hits_the_limit() {
    let mut settings = test_settings();
    settings.max_reconnections = 2;
    let (connection, factory, mut events) = connected(settings).await;

    let mut stats = connection.stats().await.unwrap();
    for _ in 0..10 {
        if stats.state == ConnectionState::Closed {
            break;
        }
        assert_eq!(stats.state, ConnectionState::Connected);
        factory.last().drop_connection();
        stats = advance(&connection, Duration::from_millis(400)).await;
    }

    assert_eq!(stats.state, ConnectionState::Closed);
    // The initial connection plus two reconnections.
    assert_eq!(factory.count(), 3);
    let events = drain_events(&mut events);
    assert!(matches!(
        events.last(),
        Some(ConnectionEvent::Closed(reason)) if reason == "Reconnection limit reached."
    ));
}

#[tokio::test(start_paused = true)]
async fn test_discoverer_receives_the_previous_endpoint() {
    init_tracing();
    let factory = MockTransportFactory::new(MockBehavior::AutoConnect);
    let connection = Connection::with_transport(test_settings(), factory.clone());
    let discoverer = FixedDiscoverer::new(endpoint(1113));
    connection.connect(discoverer.clone()).await.unwrap();
    wait_for_state(&connection, ConnectionState::Connected).await;

    factory.transport(0).drop_connection();
    advance(&connection, Duration::from_millis(250)).await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    assert_eq!(
        discoverer.previous(),
        vec![None, Some(endpoint(1113))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnection_waits_for_the_delay() {
    let mut settings = test_settings();
    settings.reconnection_delay = Duration::from_millis(900);
    let (connection, factory, _events) = connected(settings).await;
    factory.transport(0).drop_connection();

    let stats = advance(&connection, Duration::from_millis(700)).await;
    assert_eq!(stats.state, ConnectionState::Connecting);
    assert_eq!(factory.count(), 1);

    advance(&connection, Duration::from_millis(400)).await;
    wait_for_state(&connection, ConnectionState::Connected).await;
    assert_eq!(factory.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_while_reconnecting_closes() {
    init_tracing();
    let factory = MockTransportFactory::new(MockBehavior::AutoConnect);
    let connection = Connection::with_transport(test_settings(), factory.clone());
    let mut events = connection.events();
    let discoverer = Arc::new(OneShotDiscoverer {
        calls: AtomicUsize::new(0),
    });
    connection.connect(discoverer).await.unwrap();
    wait_for_state(&connection, ConnectionState::Connected).await;

    factory.transport(0).drop_connection();
    advance(&connection, Duration::from_millis(250)).await;
    wait_for_state(&connection, ConnectionState::Closed).await;

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        ConnectionEvent::ErrorOccurred(ConnectionError::EndpointDiscovery(_))
    )));
    assert!(matches!(
        events.last(),
        Some(ConnectionEvent::Closed(reason))
            if reason == "Failed to resolve TCP endpoint to which to connect."
    ));
}
