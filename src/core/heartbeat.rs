// src/core/heartbeat.rs

//! Liveness detection for the active transport, independent of application traffic.

use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Snapshot of the heartbeat state. Replaced, never mutated, whenever the stage or
/// the tracked package number changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatInfo {
    pub last_package_number: u64,
    /// True while no ping is outstanding.
    pub is_interval_stage: bool,
    pub time_stamp: Instant,
}

impl HeartbeatInfo {
    pub fn new(last_package_number: u64, is_interval_stage: bool, time_stamp: Instant) -> Self {
        Self {
            last_package_number,
            is_interval_stage,
            time_stamp,
        }
    }
}

/// What the actor has to do after a heartbeat check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    None,
    /// Send a `HeartbeatRequestCommand` with this correlation id.
    SendRequest(Uuid),
    /// The ping went unanswered; close the transport.
    TimedOut,
}

pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    info: Option<HeartbeatInfo>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            info: None,
        }
    }

    /// Begins tracking a freshly connected transport.
    pub fn start(&mut self, package_number: u64, now: Instant) {
        self.info = Some(HeartbeatInfo::new(package_number, true, now));
    }

    /// Stops tracking; the transport is gone.
    pub fn stop(&mut self) {
        self.info = None;
    }

    pub fn info(&self) -> Option<HeartbeatInfo> {
        self.info
    }

    /// Runs one heartbeat check against the current inbound package counter.
    pub fn check(&mut self, package_number: u64, now: Instant) -> HeartbeatAction {
        let Some(info) = self.info else {
            return HeartbeatAction::None;
        };

        let window = if info.is_interval_stage {
            self.interval
        } else {
            self.timeout
        };
        if now.duration_since(info.time_stamp) < window {
            return HeartbeatAction::None;
        }

        if info.last_package_number != package_number {
            self.info = Some(HeartbeatInfo::new(package_number, true, now));
            return HeartbeatAction::None;
        }

        if info.is_interval_stage {
            self.info = Some(HeartbeatInfo::new(info.last_package_number, false, now));
            HeartbeatAction::SendRequest(Uuid::new_v4())
        } else {
            HeartbeatAction::TimedOut
        }
    }
}
