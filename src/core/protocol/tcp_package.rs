// src/core/protocol/tcp_package.rs

//! Implements the `TcpPackage` structure and the corresponding `Encoder` and
//! `Decoder` used by the TCP transport.
//!
//! A frame on the wire is laid out as:
//!
//! ```text
//! | len: u32 LE | command: u8 | flags: u8 | correlation id: 16 bytes |
//! | [login len: u8 | login | password len: u8 | password] | payload ... |
//! ```
//!
//! `len` counts everything after the length prefix. The credential block is only
//! present when `flags` carries `FLAG_AUTHENTICATED`. The correlation id uses the
//! mixed-endian GUID byte layout expected by the server.

use super::command::TcpCommand;
use crate::core::ConnectionError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

/// Size of the little-endian length prefix.
const LENGTH_PREFIX_SIZE: usize = 4;
/// Command byte + flags byte + correlation id.
const MANDATORY_SIZE: usize = 1 + 1 + 16;
/// Upper bound on a single frame, enforced in both directions.
pub const MAX_PACKAGE_SIZE: usize = 64 * 1024 * 1024;

const FLAG_NONE: u8 = 0x00;
const FLAG_AUTHENTICATED: u8 = 0x01;

/// Login and password sent with `Authenticate`, or with an individual request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

impl UserCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// The password never ends up in logs.
impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A single unit exchanged with the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpPackage {
    pub command: TcpCommand,
    pub correlation_id: Uuid,
    pub credentials: Option<UserCredentials>,
    pub payload: Bytes,
}

impl TcpPackage {
    /// Creates an unauthenticated package. An `Unknown` command carrying an
    /// assigned code is stored as its named variant, as the decoder would read it.
    pub fn new(command: TcpCommand, correlation_id: Uuid, payload: impl Into<Bytes>) -> Self {
        Self {
            command: TcpCommand::from(command.code()),
            correlation_id,
            credentials: None,
            payload: payload.into(),
        }
    }

    /// Attaches per-request credentials.
    pub fn with_credentials(mut self, credentials: Option<UserCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn heartbeat_request(correlation_id: Uuid) -> Self {
        Self::new(TcpCommand::HeartbeatRequestCommand, correlation_id, Bytes::new())
    }

    /// The reply to a server-initiated heartbeat echoes its correlation id.
    pub fn heartbeat_response(correlation_id: Uuid) -> Self {
        Self::new(TcpCommand::HeartbeatResponseCommand, correlation_id, Bytes::new())
    }

    pub fn authenticate(correlation_id: Uuid, credentials: UserCredentials) -> Self {
        Self::new(TcpCommand::Authenticate, correlation_id, Bytes::new())
            .with_credentials(Some(credentials))
    }

    /// The all-zero correlation id addresses the connection as a whole.
    pub fn is_connection_wide(&self) -> bool {
        self.correlation_id.is_nil()
    }

    /// The payload interpreted as UTF-8 text, used for server error messages.
    pub fn payload_text(&self) -> String {
        if self.payload.is_empty() {
            "<no message>".to_string()
        } else {
            String::from_utf8_lossy(&self.payload).into_owned()
        }
    }

    /// Size of the frame body, excluding the length prefix.
    fn body_len(&self) -> usize {
        let credentials_len = self
            .credentials
            .as_ref()
            .map_or(0, |c| 2 + c.username.len() + c.password.len());
        MANDATORY_SIZE + credentials_len + self.payload.len()
    }

    /// A convenience method to encode a package into a `Vec<u8>`.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, ConnectionError> {
        let mut buf = BytesMut::new();
        TcpPackageCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `TcpPackage`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpPackageCodec;

impl Encoder<TcpPackage> for TcpPackageCodec {
    type Error = ConnectionError;

    fn encode(&mut self, item: TcpPackage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len = item.body_len();
        if body_len > MAX_PACKAGE_SIZE {
            return Err(ConnectionError::Protocol(format!(
                "package of {body_len} bytes exceeds the maximum of {MAX_PACKAGE_SIZE} bytes"
            )));
        }

        if let Some(credentials) = &item.credentials
            && (credentials.username.len() > u8::MAX as usize
                || credentials.password.len() > u8::MAX as usize)
        {
            return Err(ConnectionError::Protocol(
                "login and password must each be at most 255 bytes".into(),
            ));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + body_len);
        dst.put_u32_le(body_len as u32);
        dst.put_u8(item.command.code());

        match &item.credentials {
            Some(credentials) => {
                let login = credentials.username.as_bytes();
                let password = credentials.password.as_bytes();
                dst.put_u8(FLAG_AUTHENTICATED);
                dst.put_slice(&item.correlation_id.to_bytes_le());
                dst.put_u8(login.len() as u8);
                dst.put_slice(login);
                dst.put_u8(password.len() as u8);
                dst.put_slice(password);
            }
            None => {
                dst.put_u8(FLAG_NONE);
                dst.put_slice(&item.correlation_id.to_bytes_le());
            }
        }

        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for TcpPackageCodec {
    type Item = TcpPackage;
    type Error = ConnectionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let body_len = u32::from_le_bytes(prefix) as usize;

        if body_len < MANDATORY_SIZE {
            return Err(ConnectionError::Protocol(format!(
                "package of {body_len} bytes is smaller than the mandatory {MANDATORY_SIZE} bytes"
            )));
        }
        if body_len > MAX_PACKAGE_SIZE {
            return Err(ConnectionError::Protocol(format!(
                "package of {body_len} bytes exceeds the maximum of {MAX_PACKAGE_SIZE} bytes"
            )));
        }

        let frame_len = LENGTH_PREFIX_SIZE + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let mut body = src.split_to(body_len);

        let command = TcpCommand::from(body.get_u8());
        let flags = body.get_u8();
        let mut id = [0u8; 16];
        body.copy_to_slice(&mut id);
        let correlation_id = Uuid::from_bytes_le(id);

        let credentials = if flags & FLAG_AUTHENTICATED != 0 {
            let username = read_short_string(&mut body, "login")?;
            let password = read_short_string(&mut body, "password")?;
            Some(UserCredentials { username, password })
        } else {
            None
        };

        Ok(Some(TcpPackage {
            command,
            correlation_id,
            credentials,
            payload: body.freeze(),
        }))
    }
}

/// Reads a string prefixed by a single length byte.
fn read_short_string(body: &mut BytesMut, field: &str) -> Result<String, ConnectionError> {
    if body.is_empty() {
        return Err(ConnectionError::Protocol(format!("missing {field} length")));
    }
    let len = body.get_u8() as usize;
    if body.len() < len {
        return Err(ConnectionError::Protocol(format!(
            "{field} length {len} exceeds remaining package size {}",
            body.len()
        )));
    }
    let raw = body.split_to(len);
    Ok(String::from_utf8(raw.to_vec())?)
}
