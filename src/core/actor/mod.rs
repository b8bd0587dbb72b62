// src/core/actor/mod.rs

//! The connection actor: the single owner of all mutable connection state.
//!
//! Every input (public API calls, timer ticks, discovery results and transport
//! events) arrives as a `Message` on one FIFO queue. The actor drains the queue
//! one message at a time, so no handler ever runs concurrently with another and
//! no locks are needed around connection state. Handlers never block: socket I/O
//! and endpoint discovery run on their own tasks and report back through the
//! same queue.

use crate::config::ConnectionSettings;
use crate::core::ConnectionError;
use crate::core::discovery::EndpointDiscoverer;
use crate::core::events::ConnectionEvent;
use crate::core::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::core::inspection::{InspectionDecision, InspectionResult};
use crate::core::operations::{Operation, OperationTracker};
use crate::core::protocol::{TcpCommand, TcpPackage};
use crate::core::reconnection::{ReconnectionController, ReconnectionStep};
use crate::core::subscriptions::{Subscription, SubscriptionDropReason, SubscriptionTracker};
use crate::core::transport::{Transport, TransportEvents, TransportFactory};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

pub mod messages;
pub mod state;

pub use messages::{ConnectReply, Message};
pub use state::{AuthInfo, ConnectingPhase, ConnectionState, ConnectionStats};

/// Period of the internal timer driving reconnection, heartbeats and timeouts.
pub const TIMER_PERIOD: Duration = Duration::from_millis(200);

pub struct ConnectionActor {
    name: String,
    settings: ConnectionSettings,
    state: ConnectionState,
    phase: ConnectingPhase,
    /// Weak, so the queue closes once every external producer is gone.
    sender: mpsc::WeakUnboundedSender<Message>,
    factory: Arc<dyn TransportFactory>,
    discoverer: Option<Arc<dyn EndpointDiscoverer>>,
    transport: Option<Arc<dyn Transport>>,
    last_endpoint: Option<SocketAddr>,
    operations: OperationTracker,
    subscriptions: SubscriptionTracker,
    heartbeat: HeartbeatMonitor,
    reconnection: ReconnectionController,
    auth: Option<AuthInfo>,
    was_connected: bool,
    package_number: u64,
    last_timeout_check: Instant,
    timer: Option<JoinHandle<()>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionActor {
    pub fn new(
        settings: ConnectionSettings,
        factory: Arc<dyn TransportFactory>,
        sender: &mpsc::UnboundedSender<Message>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        let now = Instant::now();
        let name = settings.connection_name.clone();
        Self {
            operations: OperationTracker::new(name.clone(), settings.max_queue_size),
            subscriptions: SubscriptionTracker::new(name.clone(), settings.max_queue_size),
            heartbeat: HeartbeatMonitor::new(
                settings.heartbeat_interval,
                settings.heartbeat_timeout,
            ),
            reconnection: ReconnectionController::new(
                settings.reconnection_delay,
                settings.max_reconnections,
                now,
            ),
            name,
            settings,
            state: ConnectionState::Init,
            phase: ConnectingPhase::Invalid,
            sender: sender.downgrade(),
            factory,
            discoverer: None,
            transport: None,
            last_endpoint: None,
            auth: None,
            was_connected: false,
            package_number: 0,
            last_timeout_check: now,
            timer: None,
            events,
        }
    }

    /// Creates the queue, starts the timer and runs the actor on its own task.
    /// Returns the producer side of the queue.
    pub fn spawn(
        settings: ConnectionSettings,
        factory: Arc<dyn TransportFactory>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> mpsc::UnboundedSender<Message> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut actor = Self::new(settings, factory, &sender, events);
        actor.start_timer();
        tokio::spawn(actor.run(receiver));
        sender
    }

    /// Drains the queue until every producer has gone away.
    pub async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Message>) {
        debug!("Connection '{}': actor started.", self.name);
        while let Some(message) = receiver.recv().await {
            self.handle(message);
        }
        self.stop_timer();
        debug!("Connection '{}': actor stopped.", self.name);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn phase(&self) -> ConnectingPhase {
        self.phase
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.state,
            phase: self.phase,
            connection_id: self.transport.as_ref().map(|t| t.connection_id()),
            remote_endpoint: self.transport.as_ref().map(|t| t.remote_endpoint()),
            active_operations: self.operations.active_count(),
            waiting_operations: self.operations.waiting_count(),
            active_subscriptions: self.subscriptions.active_count(),
            confirmed_subscriptions: self.subscriptions.confirmed_count(),
            waiting_subscriptions: self.subscriptions.waiting_count(),
            package_number: self.package_number,
            reconnection_attempt: self.reconnection.info().attempt,
        }
    }

    /// Handles a single message to completion.
    pub fn handle(&mut self, message: Message) {
        trace!(
            "Connection '{}': {} in state {}/{}.",
            self.name,
            message.name(),
            self.state,
            self.phase
        );
        match message {
            Message::StartConnection { discoverer, reply } => {
                self.start_connection(discoverer, reply)
            }
            Message::CloseConnection { reason, error } => self.close_connection(&reason, error),
            Message::StartOperation {
                operation,
                max_retries,
                timeout,
            } => self.start_operation(operation, max_retries, timeout),
            Message::StartSubscription {
                key,
                subscription,
                max_retries,
                timeout,
            } => self.start_subscription(key, subscription, max_retries, timeout),
            Message::Unsubscribe { key } => self.unsubscribe(key),
            Message::EstablishTcpConnection { endpoint } => self.establish_tcp_connection(endpoint),
            Message::TcpConnectionEstablished { connection_id } => {
                self.tcp_connection_established(connection_id)
            }
            Message::TcpConnectionError {
                connection_id,
                error,
            } => self.tcp_connection_error(connection_id, error),
            Message::TcpConnectionClosed { connection_id } => {
                self.tcp_connection_closed(connection_id)
            }
            Message::HandleTcpPackage {
                connection_id,
                package,
            } => self.handle_tcp_package(connection_id, package),
            Message::TimerTick => self.timer_tick(),
            Message::GetStats { reply } => {
                // The caller may have stopped waiting.
                let _ = reply.send(self.stats());
            }
        }
    }

    // --- Public entry points ---

    fn start_connection(
        &mut self,
        discoverer: Arc<dyn EndpointDiscoverer>,
        reply: Option<ConnectReply>,
    ) {
        match self.state {
            ConnectionState::Init => {
                info!("Connection '{}': starting.", self.name);
                self.discoverer = Some(discoverer);
                self.state = ConnectionState::Connecting;
                self.phase = ConnectingPhase::Reconnecting;
                self.discover_endpoint(reply);
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(
                    "Connection '{}': StartConnection ignored, already active.",
                    self.name
                );
                reply_to(reply, Err(ConnectionError::AlreadyActive(self.name.clone())));
            }
            ConnectionState::Closed => {
                debug!("Connection '{}': StartConnection ignored, closed.", self.name);
                reply_to(reply, Err(ConnectionError::Closed(self.name.clone())));
            }
        }
    }

    fn close_connection(&mut self, reason: &str, error: Option<ConnectionError>) {
        match self.state {
            ConnectionState::Init | ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(
                    "Connection '{}': CloseConnection, reason: {}, error: {}.",
                    self.name,
                    reason,
                    error.as_ref().map_or("<none>".to_string(), |e| e.to_string())
                );
                self.state = ConnectionState::Closed;
                self.stop_timer();
                self.operations.clean_up();
                self.subscriptions.clean_up();
                self.close_tcp_connection(reason);

                info!("Connection '{}': closed. Reason: {}.", self.name, reason);
                if let Some(error) = error {
                    self.emit(ConnectionEvent::ErrorOccurred(error));
                }
                self.emit(ConnectionEvent::Closed(reason.to_string()));
            }
            ConnectionState::Closed => {
                debug!(
                    "Connection '{}': CloseConnection ignored, already closed. Reason: {}.",
                    self.name, reason
                );
            }
        }
    }

    fn start_operation(
        &mut self,
        mut operation: Box<dyn Operation>,
        max_retries: i32,
        timeout: Duration,
    ) {
        match self.state {
            ConnectionState::Init => {
                operation.fail(ConnectionError::NotActive(self.name.clone()));
            }
            ConnectionState::Connecting => {
                let item = self.operations.item(operation, max_retries, timeout);
                debug!("Connection '{}': StartOperation enqueue {}.", self.name, item);
                self.operations.enqueue_operation(item);
            }
            ConnectionState::Connected => {
                let item = self.operations.item(operation, max_retries, timeout);
                match &self.transport {
                    Some(transport) => self.operations.schedule_operation(item, transport.as_ref()),
                    None => {
                        error!(
                            "Connection '{}': connected without a transport, enqueueing {}.",
                            self.name, item
                        );
                        self.operations.enqueue_operation(item);
                    }
                }
            }
            ConnectionState::Closed => {
                operation.fail(ConnectionError::Closed(self.name.clone()));
            }
        }
    }

    fn start_subscription(
        &mut self,
        key: u64,
        mut subscription: Box<dyn Subscription>,
        max_retries: i32,
        timeout: Duration,
    ) {
        match self.state {
            ConnectionState::Init => subscription.drop_subscription(
                SubscriptionDropReason::SubscribingError,
                Some(ConnectionError::NotActive(self.name.clone())),
            ),
            ConnectionState::Connecting => {
                let item = self
                    .subscriptions
                    .item(key, subscription, max_retries, timeout);
                debug!("Connection '{}': StartSubscription enqueue {}.", self.name, item);
                self.subscriptions.enqueue_subscription(item);
            }
            ConnectionState::Connected => {
                let item = self
                    .subscriptions
                    .item(key, subscription, max_retries, timeout);
                match &self.transport {
                    Some(transport) => self
                        .subscriptions
                        .start_subscription(item, transport.as_ref()),
                    None => self.subscriptions.enqueue_subscription(item),
                }
            }
            ConnectionState::Closed => subscription.drop_subscription(
                SubscriptionDropReason::SubscribingError,
                Some(ConnectionError::Closed(self.name.clone())),
            ),
        }
    }

    fn unsubscribe(&mut self, key: u64) {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.subscriptions
                    .unsubscribe(key, self.transport.as_deref());
            }
            // Nothing is tracked: subscriptions were refused or already dropped.
            ConnectionState::Init | ConnectionState::Closed => {}
        }
    }

    // --- Discovery and transport life cycle ---

    /// Runs the discoverer on its own task. The result re-enters the queue as
    /// `EstablishTcpConnection` or `CloseConnection`.
    fn discover_endpoint(&mut self, reply: Option<ConnectReply>) {
        if self.state != ConnectionState::Connecting
            || self.phase != ConnectingPhase::Reconnecting
        {
            reply_to(reply, Ok(()));
            return;
        }
        let (Some(discoverer), Some(sender)) = (self.discoverer.clone(), self.sender.upgrade())
        else {
            reply_to(
                reply,
                Err(ConnectionError::Internal(
                    "endpoint discovery started without a discoverer".into(),
                )),
            );
            return;
        };

        self.phase = ConnectingPhase::EndpointDiscovery;
        let previous = self.last_endpoint;
        let name = self.name.clone();
        debug!(
            "Connection '{}': discovering endpoint, previous: {:?}.",
            self.name, previous
        );

        tokio::spawn(async move {
            match discoverer.discover(previous).await {
                Ok(endpoint) => {
                    debug!("Connection '{name}': discovered endpoint {endpoint}.");
                    let _ = sender.send(Message::EstablishTcpConnection { endpoint });
                    reply_to(reply, Ok(()));
                }
                Err(e) => {
                    warn!("Connection '{name}': endpoint discovery failed: {e}");
                    let _ = sender.send(Message::CloseConnection {
                        reason: "Failed to resolve TCP endpoint to which to connect.".into(),
                        error: Some(e.clone()),
                    });
                    reply_to(reply, Err(ConnectionError::EndpointDiscovery(e.to_string())));
                }
            }
        });
    }

    fn establish_tcp_connection(&mut self, endpoint: SocketAddr) {
        if self.state != ConnectionState::Connecting
            || self.phase != ConnectingPhase::EndpointDiscovery
        {
            debug!(
                "Connection '{}': EstablishTcpConnection to {} ignored in {}/{}.",
                self.name, endpoint, self.state, self.phase
            );
            return;
        }
        let Some(sender) = self.sender.upgrade() else {
            return;
        };

        debug!(
            "Connection '{}': establishing TCP connection to {}.",
            self.name, endpoint
        );
        self.phase = ConnectingPhase::ConnectionEstablishing;
        let events = TransportEvents::new(Uuid::new_v4(), sender);
        let transport = self.factory.create(endpoint, events);
        self.last_endpoint = Some(endpoint);
        self.transport = Some(transport);
    }

    fn tcp_connection_established(&mut self, connection_id: Uuid) {
        let Some(transport) = self.current_transport(connection_id) else {
            debug!(
                "Connection '{}': TCP connection {} established, ignored: not the tracked transport.",
                self.name, connection_id
            );
            return;
        };
        if self.state != ConnectionState::Connecting || transport.is_closed() {
            debug!(
                "Connection '{}': TCP connection {} established, ignored in state {} (closed: {}).",
                self.name,
                connection_id,
                self.state,
                transport.is_closed()
            );
            return;
        }

        debug!(
            "Connection '{}': TCP connection to [{}, L{:?}, {}] established.",
            self.name,
            transport.remote_endpoint(),
            transport.local_endpoint(),
            connection_id
        );
        let now = Instant::now();
        self.heartbeat.start(self.package_number, now);

        match self.settings.default_user_credentials.clone() {
            Some(credentials) => {
                self.phase = ConnectingPhase::Authentication;
                let auth = AuthInfo::new(Uuid::new_v4(), now);
                self.auth = Some(auth);
                transport.send(TcpPackage::authenticate(auth.correlation_id, credentials));
            }
            None => self.go_to_connected_state(),
        }
    }

    fn tcp_connection_error(&mut self, connection_id: Uuid, error: ConnectionError) {
        if self.current_transport(connection_id).is_none()
            || self.state == ConnectionState::Closed
        {
            debug!(
                "Connection '{}': TCP connection error on {} ignored: {}.",
                self.name, connection_id, error
            );
            return;
        }
        debug!(
            "Connection '{}': TCP connection error on {}: {}.",
            self.name, connection_id, error
        );
        self.close_connection("TCP connection error occurred.", Some(error));
    }

    fn tcp_connection_closed(&mut self, connection_id: Uuid) {
        let transport = match self.state {
            ConnectionState::Init => {
                warn!(
                    "Connection '{}': TCP connection {} closed before the connection started.",
                    self.name, connection_id
                );
                return;
            }
            ConnectionState::Closed => None,
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.current_transport(connection_id)
            }
        };
        let Some(transport) = transport else {
            debug!(
                "Connection '{}': TCP connection {} closed, ignored in state {}.",
                self.name, connection_id, self.state
            );
            return;
        };

        let remote = transport.remote_endpoint();
        debug!(
            "Connection '{}': TCP connection to [{}, L{:?}, {}] closed.",
            self.name,
            remote,
            transport.local_endpoint(),
            connection_id
        );
        self.state = ConnectionState::Connecting;
        self.phase = ConnectingPhase::Reconnecting;
        self.transport = None;
        self.auth = None;
        self.heartbeat.stop();
        self.subscriptions
            .purge_subscribed_and_dropped_subscriptions(connection_id);
        self.reconnection.connection_dropped(Instant::now());

        if self.was_connected {
            self.was_connected = false;
            self.emit(ConnectionEvent::Disconnected(remote));
        }
    }

    /// Closes the tracked transport and applies the close right away, without
    /// waiting for the transport's own close event.
    fn close_tcp_connection(&mut self, reason: &str) {
        let Some(transport) = self.transport.clone() else {
            debug!(
                "Connection '{}': CloseTcpConnection ignored, no transport.",
                self.name
            );
            return;
        };
        debug!("Connection '{}': CloseTcpConnection: {}.", self.name, reason);
        transport.close(reason);
        self.tcp_connection_closed(transport.connection_id());
        self.transport = None;
    }

    fn go_to_connected_state(&mut self) {
        let Some(transport) = self.transport.clone() else {
            error!(
                "Connection '{}': cannot enter Connected without a transport.",
                self.name
            );
            return;
        };

        self.state = ConnectionState::Connected;
        self.phase = ConnectingPhase::Connected;
        self.auth = None;
        self.was_connected = true;
        info!(
            "Connection '{}': connected to {}.",
            self.name,
            transport.remote_endpoint()
        );
        self.emit(ConnectionEvent::Connected(transport.remote_endpoint()));
        self.check_timeouts_and_retry(transport.as_ref());
    }

    /// Redirects the connection to `target`, as requested by an inspection result.
    fn reconnect_to(&mut self, target: Option<SocketAddr>) {
        let Some(endpoint) = target else {
            self.close_connection(
                "No end point is specified while trying to reconnect.",
                None,
            );
            return;
        };
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(transport) = self.transport.clone() else {
            return;
        };
        if transport.remote_endpoint() == endpoint {
            return;
        }

        let message = format!(
            "Connection '{}': going to reconnect to [{}]. Current endpoint: [{}, L{:?}].",
            self.name,
            endpoint,
            transport.remote_endpoint(),
            transport.local_endpoint()
        );
        info!("{message}");
        self.close_tcp_connection(&message);

        self.state = ConnectionState::Connecting;
        self.phase = ConnectingPhase::EndpointDiscovery;
        self.establish_tcp_connection(endpoint);
    }

    // --- Inbound packages ---

    fn handle_tcp_package(&mut self, connection_id: Uuid, package: TcpPackage) {
        if matches!(self.state, ConnectionState::Init | ConnectionState::Closed) {
            debug!(
                "Connection '{}': package {} {} ignored in state {}.",
                self.name, package.command, package.correlation_id, self.state
            );
            return;
        }
        let Some(transport) = self.current_transport(connection_id) else {
            debug!(
                "Connection '{}': package {} {} from stale connection {} ignored.",
                self.name, package.command, package.correlation_id, connection_id
            );
            return;
        };

        trace!(
            "Connection '{}': HandleTcpPackage {}, {}.",
            self.name, package.command, package.correlation_id
        );
        self.package_number += 1;

        match package.command {
            TcpCommand::HeartbeatResponseCommand => return,
            TcpCommand::HeartbeatRequestCommand => {
                transport.send(TcpPackage::heartbeat_response(package.correlation_id));
                return;
            }
            TcpCommand::Authenticated | TcpCommand::NotAuthenticated
                if self.is_pending_authentication(package.correlation_id) =>
            {
                if package.command == TcpCommand::NotAuthenticated {
                    self.raise_authentication_failed("Not authenticated");
                }
                self.go_to_connected_state();
                return;
            }
            TcpCommand::BadRequest if package.is_connection_wide() => {
                let error = ConnectionError::BadRequest(format!(
                    "Bad request received from server. Error: {}",
                    package.payload_text()
                ));
                self.close_connection(
                    "Connection-wide BadRequest received. Too dangerous to continue.",
                    Some(error),
                );
                return;
            }
            _ => {}
        }

        if let Some(item) = self.operations.get_active_operation(&package.correlation_id) {
            let result = item.operation.inspect_package(&package);
            debug!(
                "Connection '{}': OPERATION DECISION {} ({}), {}.",
                self.name, result.decision, result.description, item
            );
            self.apply_operation_decision(package.correlation_id, result);
        } else if let Some(item) = self
            .subscriptions
            .get_active_subscription(&package.correlation_id)
        {
            let result = item.subscription.inspect_package(&package);
            debug!(
                "Connection '{}': SUBSCRIPTION DECISION {} ({}), {}.",
                self.name, result.decision, result.description, item
            );
            self.apply_subscription_decision(package.correlation_id, result);
        } else {
            debug!(
                "Connection '{}': UNMAPPED PACKAGE with correlation id {}, command {}.",
                self.name, package.correlation_id, package.command
            );
        }
    }

    fn is_pending_authentication(&self, correlation_id: Uuid) -> bool {
        self.state == ConnectionState::Connecting
            && self.phase == ConnectingPhase::Authentication
            && self
                .auth
                .is_some_and(|auth| auth.correlation_id == correlation_id)
    }

    fn apply_operation_decision(&mut self, correlation_id: Uuid, result: InspectionResult) {
        match result.decision {
            InspectionDecision::DoNothing => {}
            InspectionDecision::EndOperation => {
                self.operations.remove_operation(&correlation_id);
            }
            InspectionDecision::Retry => {
                self.operations.schedule_operation_retry(&correlation_id);
            }
            InspectionDecision::Reconnect => {
                self.reconnect_to(result.target_endpoint);
                self.operations.schedule_operation_retry(&correlation_id);
            }
            InspectionDecision::Subscribed => {
                let error = ConnectionError::InvalidDecision(format!(
                    "operation returned {} ({})",
                    result.decision, result.description
                ));
                error!("Connection '{}': {}.", self.name, error);
                self.close_connection("Invalid inspection decision.", Some(error));
                return;
            }
        }

        if self.state == ConnectionState::Connected
            && let Some(transport) = &self.transport
        {
            self.operations.schedule_waiting_operations(transport.as_ref());
        }
    }

    fn apply_subscription_decision(&mut self, correlation_id: Uuid, result: InspectionResult) {
        match result.decision {
            InspectionDecision::DoNothing => {}
            InspectionDecision::EndOperation => {
                self.subscriptions.remove_subscription(&correlation_id);
            }
            InspectionDecision::Retry => {
                self.subscriptions
                    .schedule_subscription_retry(&correlation_id);
            }
            InspectionDecision::Reconnect => {
                self.reconnect_to(result.target_endpoint);
                self.subscriptions
                    .schedule_subscription_retry(&correlation_id);
            }
            InspectionDecision::Subscribed => {
                if let Some(item) = self.subscriptions.get_active_subscription(&correlation_id) {
                    item.is_subscribed = true;
                }
            }
        }

        if self.state == ConnectionState::Connected
            && let Some(transport) = &self.transport
        {
            self.subscriptions
                .schedule_waiting_subscriptions(transport.as_ref());
        }
    }

    // --- Timer ---

    fn timer_tick(&mut self) {
        match self.state {
            ConnectionState::Init | ConnectionState::Closed => {}
            ConnectionState::Connecting => {
                let now = Instant::now();
                if self.phase == ConnectingPhase::Reconnecting {
                    match self.reconnection.tick(now) {
                        ReconnectionStep::Wait => {}
                        ReconnectionStep::LimitReached { attempt } => {
                            info!(
                                "Connection '{}': reconnection limit reached after {} attempts.",
                                self.name,
                                attempt - 1
                            );
                            self.close_connection("Reconnection limit reached.", None);
                            return;
                        }
                        ReconnectionStep::Retry { attempt } => {
                            info!(
                                "Connection '{}': reconnecting, attempt {}.",
                                self.name, attempt
                            );
                            self.emit(ConnectionEvent::Reconnecting);
                            self.discover_endpoint(None);
                        }
                    }
                }

                if self.phase == ConnectingPhase::Authentication
                    && self.auth.is_some_and(|auth| {
                        now.duration_since(auth.time_stamp) > self.settings.operation_timeout
                    })
                {
                    self.raise_authentication_failed("Authentication timed out.");
                    self.go_to_connected_state();
                }

                if self.phase >= ConnectingPhase::ConnectionEstablishing {
                    self.manage_heartbeats();
                }
            }
            ConnectionState::Connected => {
                let now = Instant::now();
                if now.duration_since(self.last_timeout_check)
                    >= self.settings.operation_timeout_check_period
                    && let Some(transport) = self.transport.clone()
                {
                    // Some platforms report connects that later fail, so the attempt
                    // counter is only cleared once the connection survives a full
                    // check period.
                    self.reconnection.reset(now);
                    self.check_timeouts_and_retry(transport.as_ref());
                }
                self.manage_heartbeats();
            }
        }
    }

    /// Periodic maintenance while connected: retries items orphaned by an old
    /// transport, handles timed out items and flushes everything pending.
    fn check_timeouts_and_retry(&mut self, transport: &dyn Transport) {
        let now = Instant::now();
        let fail = self.settings.fail_on_no_server_response;
        self.operations.check_timeouts_and_retry(transport, fail);
        self.subscriptions.check_timeouts_and_retry(transport, fail);
        self.last_timeout_check = now;
    }

    fn manage_heartbeats(&mut self) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        match self.heartbeat.check(self.package_number, Instant::now()) {
            HeartbeatAction::None => {}
            HeartbeatAction::SendRequest(correlation_id) => {
                trace!(
                    "Connection '{}': sending heartbeat request {}.",
                    self.name, correlation_id
                );
                transport.send(TcpPackage::heartbeat_request(correlation_id));
            }
            HeartbeatAction::TimedOut => {
                let message = format!(
                    "Connection '{}': closing TCP connection [{}, L{:?}, {}] due to HEARTBEAT TIMEOUT at pkgNum {}.",
                    self.name,
                    transport.remote_endpoint(),
                    transport.local_endpoint(),
                    transport.connection_id(),
                    self.package_number
                );
                info!("{message}");
                self.close_tcp_connection(&message);
            }
        }
    }

    fn start_timer(&mut self) {
        let sender = self.sender.clone();
        self.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + TIMER_PERIOD, TIMER_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(sender) = sender.upgrade() else {
                    break;
                };
                if sender.send(Message::TimerTick).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    // --- Helpers ---

    /// The tracked transport, if `connection_id` refers to it.
    fn current_transport(&self, connection_id: Uuid) -> Option<Arc<dyn Transport>> {
        self.transport
            .as_ref()
            .filter(|t| t.connection_id() == connection_id)
            .cloned()
    }

    fn raise_authentication_failed(&self, reason: &str) {
        warn!(
            "Connection '{}': authentication failed: {}.",
            self.name, reason
        );
        self.emit(ConnectionEvent::AuthenticationFailed(reason.to_string()));
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

fn reply_to(reply: Option<ConnectReply>, result: Result<(), ConnectionError>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}
