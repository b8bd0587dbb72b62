// src/core/inspection.rs

//! The verdict an Operation or Subscription returns after looking at a response.

use std::fmt;
use std::net::SocketAddr;

/// What the engine should do with the item that inspected a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectionDecision {
    /// Keep the item tracked, nothing changes.
    DoNothing,
    /// The item resolved itself; stop tracking it.
    EndOperation,
    /// Send the request again, subject to the retry budget.
    Retry,
    /// Retry against the endpoint carried by the result.
    Reconnect,
    /// A subscription was confirmed by the server. Only valid for subscriptions.
    Subscribed,
}

impl fmt::Display for InspectionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionResult {
    pub decision: InspectionDecision,
    pub description: String,
    pub target_endpoint: Option<SocketAddr>,
}

impl InspectionResult {
    pub fn new(decision: InspectionDecision, description: impl Into<String>) -> Self {
        Self {
            decision,
            description: description.into(),
            target_endpoint: None,
        }
    }

    pub fn do_nothing(description: impl Into<String>) -> Self {
        Self::new(InspectionDecision::DoNothing, description)
    }

    pub fn end_operation(description: impl Into<String>) -> Self {
        Self::new(InspectionDecision::EndOperation, description)
    }

    pub fn retry(description: impl Into<String>) -> Self {
        Self::new(InspectionDecision::Retry, description)
    }

    pub fn subscribed(description: impl Into<String>) -> Self {
        Self::new(InspectionDecision::Subscribed, description)
    }

    /// A redirect to another node, e.g. when the current one is not the leader.
    pub fn reconnect(description: impl Into<String>, target: Option<SocketAddr>) -> Self {
        Self {
            decision: InspectionDecision::Reconnect,
            description: description.into(),
            target_endpoint: target,
        }
    }
}
