// src/core/protocol/command.rs

//! The command byte carried by every package.

use std::fmt;

/// Identifies the kind of a package. The engine routes on a handful of these
/// (heartbeats, authentication, `BadRequest`); every other command is routed purely
/// by correlation id to the Operation or Subscription that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpCommand {
    HeartbeatRequestCommand,
    HeartbeatResponseCommand,
    Ping,
    Pong,

    WriteEvents,
    WriteEventsCompleted,
    DeleteStream,
    DeleteStreamCompleted,

    ReadEvent,
    ReadEventCompleted,
    ReadStreamEventsForward,
    ReadStreamEventsForwardCompleted,
    ReadStreamEventsBackward,
    ReadStreamEventsBackwardCompleted,
    ReadAllEventsForward,
    ReadAllEventsForwardCompleted,
    ReadAllEventsBackward,
    ReadAllEventsBackwardCompleted,

    SubscribeToStream,
    SubscriptionConfirmation,
    StreamEventAppeared,
    UnsubscribeFromStream,
    SubscriptionDropped,

    BadRequest,
    NotHandled,
    Authenticate,
    Authenticated,
    NotAuthenticated,

    /// A command byte this client does not know by name. Only meaningful for
    /// unassigned codes; build it through `TcpCommand::from` so an assigned code
    /// always maps to its named variant.
    Unknown(u8),
}

impl TcpCommand {
    /// The wire byte for this command.
    pub fn code(self) -> u8 {
        match self {
            TcpCommand::HeartbeatRequestCommand => 0x01,
            TcpCommand::HeartbeatResponseCommand => 0x02,
            TcpCommand::Ping => 0x03,
            TcpCommand::Pong => 0x04,
            TcpCommand::WriteEvents => 0x82,
            TcpCommand::WriteEventsCompleted => 0x83,
            TcpCommand::DeleteStream => 0x8A,
            TcpCommand::DeleteStreamCompleted => 0x8B,
            TcpCommand::ReadEvent => 0xB0,
            TcpCommand::ReadEventCompleted => 0xB1,
            TcpCommand::ReadStreamEventsForward => 0xB2,
            TcpCommand::ReadStreamEventsForwardCompleted => 0xB3,
            TcpCommand::ReadStreamEventsBackward => 0xB4,
            TcpCommand::ReadStreamEventsBackwardCompleted => 0xB5,
            TcpCommand::ReadAllEventsForward => 0xB6,
            TcpCommand::ReadAllEventsForwardCompleted => 0xB7,
            TcpCommand::ReadAllEventsBackward => 0xB8,
            TcpCommand::ReadAllEventsBackwardCompleted => 0xB9,
            TcpCommand::SubscribeToStream => 0xC0,
            TcpCommand::SubscriptionConfirmation => 0xC1,
            TcpCommand::StreamEventAppeared => 0xC2,
            TcpCommand::UnsubscribeFromStream => 0xC3,
            TcpCommand::SubscriptionDropped => 0xC4,
            TcpCommand::BadRequest => 0xF0,
            TcpCommand::NotHandled => 0xF1,
            TcpCommand::Authenticate => 0xF2,
            TcpCommand::Authenticated => 0xF3,
            TcpCommand::NotAuthenticated => 0xF4,
            TcpCommand::Unknown(code) => code,
        }
    }

    /// Returns true for the two heartbeat commands, which either side may initiate.
    pub fn is_heartbeat(self) -> bool {
        matches!(
            self,
            TcpCommand::HeartbeatRequestCommand | TcpCommand::HeartbeatResponseCommand
        )
    }
}

impl From<u8> for TcpCommand {
    fn from(code: u8) -> Self {
        match code {
            0x01 => TcpCommand::HeartbeatRequestCommand,
            0x02 => TcpCommand::HeartbeatResponseCommand,
            0x03 => TcpCommand::Ping,
            0x04 => TcpCommand::Pong,
            0x82 => TcpCommand::WriteEvents,
            0x83 => TcpCommand::WriteEventsCompleted,
            0x8A => TcpCommand::DeleteStream,
            0x8B => TcpCommand::DeleteStreamCompleted,
            0xB0 => TcpCommand::ReadEvent,
            0xB1 => TcpCommand::ReadEventCompleted,
            0xB2 => TcpCommand::ReadStreamEventsForward,
            0xB3 => TcpCommand::ReadStreamEventsForwardCompleted,
            0xB4 => TcpCommand::ReadStreamEventsBackward,
            0xB5 => TcpCommand::ReadStreamEventsBackwardCompleted,
            0xB6 => TcpCommand::ReadAllEventsForward,
            0xB7 => TcpCommand::ReadAllEventsForwardCompleted,
            0xB8 => TcpCommand::ReadAllEventsBackward,
            0xB9 => TcpCommand::ReadAllEventsBackwardCompleted,
            0xC0 => TcpCommand::SubscribeToStream,
            0xC1 => TcpCommand::SubscriptionConfirmation,
            0xC2 => TcpCommand::StreamEventAppeared,
            0xC3 => TcpCommand::UnsubscribeFromStream,
            0xC4 => TcpCommand::SubscriptionDropped,
            0xF0 => TcpCommand::BadRequest,
            0xF1 => TcpCommand::NotHandled,
            0xF2 => TcpCommand::Authenticate,
            0xF3 => TcpCommand::Authenticated,
            0xF4 => TcpCommand::NotAuthenticated,
            other => TcpCommand::Unknown(other),
        }
    }
}

impl From<TcpCommand> for u8 {
    fn from(command: TcpCommand) -> Self {
        command.code()
    }
}

impl fmt::Display for TcpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcpCommand::Unknown(code) => write!(f, "Unknown(0x{code:02X})"),
            known => fmt::Debug::fmt(known, f),
        }
    }
}
