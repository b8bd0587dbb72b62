// src/core/reconnection.rs

//! Reconnection bookkeeping driven by the actor's timer tick.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectionInfo {
    pub attempt: u32,
    pub time_stamp: Instant,
}

impl ReconnectionInfo {
    pub fn new(attempt: u32, time_stamp: Instant) -> Self {
        Self {
            attempt,
            time_stamp,
        }
    }

    pub fn next(&self, now: Instant) -> Self {
        Self::new(self.attempt.saturating_add(1), now)
    }
}

/// Result of a reconnection tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionStep {
    /// The reconnection delay has not elapsed yet.
    Wait,
    /// Run endpoint discovery again; this is attempt number `attempt`.
    Retry { attempt: u32 },
    /// `attempt` exceeded the configured maximum; give up.
    LimitReached { attempt: u32 },
}

pub struct ReconnectionController {
    delay: Duration,
    /// Negative means unlimited.
    max_reconnections: i32,
    info: ReconnectionInfo,
}

impl ReconnectionController {
    pub fn new(delay: Duration, max_reconnections: i32, now: Instant) -> Self {
        Self {
            delay,
            max_reconnections,
            info: ReconnectionInfo::new(0, now),
        }
    }

    pub fn info(&self) -> ReconnectionInfo {
        self.info
    }

    /// Restarts the delay clock after a drop, keeping the attempt count so that a
    /// node that refuses every connection still hits the limit.
    pub fn connection_dropped(&mut self, now: Instant) {
        self.info = ReconnectionInfo::new(self.info.attempt, now);
    }

    /// Forgets previous attempts once a connection has proven healthy.
    pub fn reset(&mut self, now: Instant) {
        self.info = ReconnectionInfo::new(0, now);
    }

    pub fn tick(&mut self, now: Instant) -> ReconnectionStep {
        if now.duration_since(self.info.time_stamp) < self.delay {
            return ReconnectionStep::Wait;
        }

        self.info = self.info.next(now);
        let attempt = self.info.attempt;
        if self.max_reconnections >= 0 && attempt > self.max_reconnections as u32 {
            ReconnectionStep::LimitReached { attempt }
        } else {
            ReconnectionStep::Retry { attempt }
        }
    }
}
