// src/core/subscriptions/stream.rs

//! A generic subscription that forwards every pushed event to a channel.

use super::{Subscription, SubscriptionDropReason};
use crate::core::ConnectionError;
use crate::core::inspection::InspectionResult;
use crate::core::protocol::{TcpCommand, TcpPackage, UserCredentials};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// What a subscriber observes, in order: at most one `Confirmed`, any number of
/// `Event`s, and exactly one terminal `Dropped`.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Confirmed,
    Event(Bytes),
    Dropped {
        reason: SubscriptionDropReason,
        error: Option<ConnectionError>,
    },
}

pub struct StreamSubscription {
    command: TcpCommand,
    payload: Bytes,
    credentials: Option<UserCredentials>,
    events: mpsc::UnboundedSender<SubscriptionEvent>,
    dropped: bool,
}

impl StreamSubscription {
    pub fn new(
        command: TcpCommand,
        payload: impl Into<Bytes>,
    ) -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let subscription = Self {
            command,
            payload: payload.into(),
            credentials: None,
            events,
            dropped: false,
        };
        (subscription, events_rx)
    }

    pub fn with_credentials(mut self, credentials: Option<UserCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    fn emit(&self, event: SubscriptionEvent) {
        if self.events.send(event).is_err() {
            debug!("Subscriber for {} is gone; event discarded.", self.command);
        }
    }
}

/// Drop reason codes carried in the first payload byte of `SubscriptionDropped`.
const DROPPED_UNSUBSCRIBED: u8 = 0;
const DROPPED_ACCESS_DENIED: u8 = 1;

/// Maps a server-initiated drop to its reason. An empty payload is a plain
/// acknowledgement of an unsubscribe.
fn dropped_by_server(payload: &[u8]) -> (SubscriptionDropReason, Option<ConnectionError>) {
    match payload.first() {
        None | Some(&DROPPED_UNSUBSCRIBED) => (SubscriptionDropReason::Unsubscribed, None),
        Some(&DROPPED_ACCESS_DENIED) => (
            SubscriptionDropReason::AccessDenied,
            Some(ConnectionError::ServerError(
                "Subscription access denied.".to_string(),
            )),
        ),
        Some(code) => (
            SubscriptionDropReason::ServerError,
            Some(ConnectionError::ServerError(format!(
                "Subscription dropped by the server, reason code {code}."
            ))),
        ),
    }
}

impl Subscription for StreamSubscription {
    fn create_subscribe_package(&self, correlation_id: Uuid) -> TcpPackage {
        TcpPackage::new(self.command, correlation_id, self.payload.clone())
            .with_credentials(self.credentials.clone())
    }

    fn inspect_package(&mut self, package: &TcpPackage) -> InspectionResult {
        match package.command {
            TcpCommand::SubscriptionConfirmation => {
                self.emit(SubscriptionEvent::Confirmed);
                InspectionResult::subscribed("SubscriptionConfirmation")
            }
            TcpCommand::StreamEventAppeared => {
                self.emit(SubscriptionEvent::Event(package.payload.clone()));
                InspectionResult::do_nothing("StreamEventAppeared")
            }
            TcpCommand::SubscriptionDropped => {
                let (reason, error) = dropped_by_server(&package.payload);
                self.drop_subscription(reason, error);
                InspectionResult::end_operation("SubscriptionDropped")
            }
            TcpCommand::NotHandled => InspectionResult::retry("NotHandled"),
            TcpCommand::BadRequest => {
                self.drop_subscription(
                    SubscriptionDropReason::ServerError,
                    Some(ConnectionError::BadRequest(package.payload_text())),
                );
                InspectionResult::end_operation("BadRequest")
            }
            TcpCommand::NotAuthenticated => {
                self.drop_subscription(
                    SubscriptionDropReason::NotAuthenticated,
                    Some(ConnectionError::NotAuthenticated(package.payload_text())),
                );
                InspectionResult::end_operation("NotAuthenticated")
            }
            other => {
                self.drop_subscription(
                    SubscriptionDropReason::ServerError,
                    Some(ConnectionError::UnexpectedCommand(other.to_string())),
                );
                InspectionResult::end_operation(format!("Unexpected command {other}"))
            }
        }
    }

    fn drop_subscription(&mut self, reason: SubscriptionDropReason, error: Option<ConnectionError>) {
        if self.dropped {
            return;
        }
        self.dropped = true;
        self.emit(SubscriptionEvent::Dropped { reason, error });
    }

    fn description(&self) -> String {
        format!("{} ({} byte payload)", self.command, self.payload.len())
    }
}
