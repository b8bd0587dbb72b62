// src/core/mod.rs

//! The central module containing the connection engine: the actor, its trackers
//! and monitors, and the collaborators it talks to.

pub mod actor;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod heartbeat;
pub mod inspection;
pub mod operations;
pub mod protocol;
pub mod reconnection;
pub mod subscriptions;
pub mod transport;

pub use errors::ConnectionError;
