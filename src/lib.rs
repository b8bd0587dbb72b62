// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;

// Re-export
pub use crate::connection::{Connection, SubscriptionHandle};
pub use crate::core::ConnectionError;
