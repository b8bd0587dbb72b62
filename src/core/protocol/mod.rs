// src/core/protocol/mod.rs

//! The package model shared by the engine and the TCP transport.

pub mod command;
pub mod tcp_package;

pub use command::TcpCommand;
pub use tcp_package::{MAX_PACKAGE_SIZE, TcpPackage, TcpPackageCodec, UserCredentials};
