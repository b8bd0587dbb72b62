// src/core/operations/request.rs

//! A generic request/response operation over opaque payloads.

use super::Operation;
use crate::core::ConnectionError;
use crate::core::inspection::InspectionResult;
use crate::core::protocol::{TcpCommand, TcpPackage, UserCredentials};
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// The outcome delivered to whoever started a `RequestOperation`.
pub type RequestResult = Result<TcpPackage, ConnectionError>;

/// Sends `command` with an opaque payload and completes when the server answers
/// with `expected_response`. Payload encoding is the caller's business.
pub struct RequestOperation {
    command: TcpCommand,
    expected_response: TcpCommand,
    payload: Bytes,
    credentials: Option<UserCredentials>,
    result_tx: Option<oneshot::Sender<RequestResult>>,
}

impl RequestOperation {
    pub fn new(
        command: TcpCommand,
        expected_response: TcpCommand,
        payload: impl Into<Bytes>,
    ) -> (Self, oneshot::Receiver<RequestResult>) {
        let (result_tx, result_rx) = oneshot::channel();
        let operation = Self {
            command,
            expected_response,
            payload: payload.into(),
            credentials: None,
            result_tx: Some(result_tx),
        };
        (operation, result_rx)
    }

    /// Authenticates this request on its own instead of relying on the
    /// connection-wide credentials.
    pub fn with_credentials(mut self, credentials: Option<UserCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    fn complete(&mut self, result: RequestResult) {
        if let Some(tx) = self.result_tx.take() {
            // The caller may have stopped waiting.
            if tx.send(result).is_err() {
                debug!("Result of {} dropped: caller went away.", self.command);
            }
        }
    }
}

impl Operation for RequestOperation {
    fn create_package(&self, correlation_id: Uuid) -> TcpPackage {
        TcpPackage::new(self.command, correlation_id, self.payload.clone())
            .with_credentials(self.credentials.clone())
    }

    fn inspect_package(&mut self, package: &TcpPackage) -> InspectionResult {
        if package.command == self.expected_response {
            self.complete(Ok(package.clone()));
            return InspectionResult::end_operation("Success");
        }

        match package.command {
            TcpCommand::NotHandled => InspectionResult::retry("NotHandled"),
            TcpCommand::BadRequest => {
                self.complete(Err(ConnectionError::BadRequest(package.payload_text())));
                InspectionResult::end_operation("BadRequest")
            }
            TcpCommand::NotAuthenticated => {
                self.complete(Err(ConnectionError::NotAuthenticated(
                    package.payload_text(),
                )));
                InspectionResult::end_operation("NotAuthenticated")
            }
            other => {
                self.complete(Err(ConnectionError::UnexpectedCommand(other.to_string())));
                InspectionResult::end_operation(format!("Unexpected command {other}"))
            }
        }
    }

    fn fail(&mut self, error: ConnectionError) {
        self.complete(Err(error));
    }

    fn description(&self) -> String {
        format!("{} -> {}", self.command, self.expected_response)
    }
}
