// src/connection/mod.rs

//! The public face of a logical connection. Everything here only enqueues
//! messages for the connection actor and awaits its replies.

mod client;
mod subscription;

pub use client::Connection;
pub use subscription::SubscriptionHandle;
