//! Frame types for the ChitChat protocol.
//!
//! Frames are the fundamental unit of communication between a chat client
//! and the server. Each frame is serialized using MessagePack.

use serde::{Deserialize, Serialize};

use crate::version::{Version, PROTOCOL_VERSION};

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// Published text failed validation.
    pub const INVALID_MESSAGE: u16 = 1001;
    /// Join request was rejected.
    pub const JOIN_REJECTED: u16 = 1002;
    /// Client speaks an incompatible protocol version.
    pub const UNSUPPORTED_VERSION: u16 = 1003;
    /// Frame is not valid in this direction.
    pub const UNEXPECTED_FRAME: u16 = 1004;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Join = 0x01,
    Publish = 0x02,
    Leave = 0x03,
    Event = 0x04,
    Ack = 0x05,
    Error = 0x06,
    Ping = 0x07,
    Pong = 0x08,
}

/// Kind of a broadcast event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum EventKind {
    /// A client joined the chat.
    Join = 0,
    /// A client published a message.
    Chat = 1,
    /// A client explicitly left the chat.
    Leave = 2,
}

impl EventKind {
    /// Upper-case label used in logs and the client display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            EventKind::Join => "JOIN",
            EventKind::Chat => "CHAT",
            EventKind::Leave => "LEAVE",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl From<EventKind> for u8 {
    fn from(kind: EventKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for EventKind {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventKind::Join),
            1 => Ok(EventKind::Chat),
            2 => Ok(EventKind::Leave),
            _ => Err("Invalid event kind"),
        }
    }
}

/// A protocol frame.
///
/// Requests (`Join`, `Publish`, `Leave`) flow from client to server and are
/// answered with `Ack` or `Error` carrying the same request id. `Event`
/// frames flow from server to every joined client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Open the event feed for a client id.
    #[serde(rename = "join")]
    Join {
        /// Request ID for acknowledgment.
        id: u64,
        /// Chosen client identifier.
        client_id: String,
        /// Protocol version spoken by the client.
        version: Version,
    },

    /// Publish a chat message.
    #[serde(rename = "publish")]
    Publish {
        /// Request ID for acknowledgment.
        id: u64,
        /// Publishing client.
        client_id: String,
        /// Raw message text, validated as UTF-8 by the server.
        #[serde(with = "serde_bytes")]
        text: Vec<u8>,
    },

    /// Leave the chat.
    #[serde(rename = "leave")]
    Leave {
        /// Request ID for acknowledgment.
        id: u64,
        /// Leaving client.
        client_id: String,
    },

    /// A Lamport-stamped broadcast event.
    #[serde(rename = "event")]
    Event {
        /// Event kind.
        kind: EventKind,
        /// Client that caused the event.
        client_id: String,
        /// Human-readable text.
        text: String,
        /// Server-assigned Lamport timestamp.
        lamport: u64,
    },

    /// Positive acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Negative acknowledgment or protocol error.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable reason.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Join { .. } => FrameType::Join,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Event { .. } => FrameType::Event,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a Join frame for the current protocol version.
    #[must_use]
    pub fn join(id: u64, client_id: impl Into<String>) -> Self {
        Frame::Join {
            id,
            client_id: client_id.into(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Create a Publish frame.
    #[must_use]
    pub fn publish(id: u64, client_id: impl Into<String>, text: impl Into<Vec<u8>>) -> Self {
        Frame::Publish {
            id,
            client_id: client_id.into(),
            text: text.into(),
        }
    }

    /// Create a Leave frame.
    #[must_use]
    pub fn leave(id: u64, client_id: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            client_id: client_id.into(),
        }
    }

    /// Create an Event frame.
    #[must_use]
    pub fn event(
        kind: EventKind,
        client_id: impl Into<String>,
        text: impl Into<String>,
        lamport: u64,
    ) -> Self {
        Frame::Event {
            kind,
            client_id: client_id.into(),
            text: text.into(),
            lamport,
        }
    }

    /// Create an Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Request id of a request or response frame.
    #[must_use]
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Frame::Join { id, .. }
            | Frame::Publish { id, .. }
            | Frame::Leave { id, .. }
            | Frame::Ack { id }
            | Frame::Error { id, .. } => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        let join = Frame::join(1, "alice");
        assert_eq!(join.frame_type(), FrameType::Join);

        let event = Frame::event(EventKind::Chat, "alice", "hi", 3);
        assert_eq!(event.frame_type(), FrameType::Event);
    }

    #[test]
    fn test_event_kind_conversion() {
        assert_eq!(EventKind::try_from(0), Ok(EventKind::Join));
        assert_eq!(EventKind::try_from(1), Ok(EventKind::Chat));
        assert_eq!(EventKind::try_from(2), Ok(EventKind::Leave));
        assert!(EventKind::try_from(3).is_err());
        assert_eq!(u8::from(EventKind::Leave), 2);
    }

    #[test]
    fn test_join_uses_current_version() {
        match Frame::join(7, "bob") {
            Frame::Join { version, .. } => assert_eq!(version, PROTOCOL_VERSION),
            other => panic!("Expected Join, got {:?}", other),
        }
    }

    #[test]
    fn test_request_id() {
        assert_eq!(Frame::leave(9, "bob").request_id(), Some(9));
        assert_eq!(Frame::error(4, codes::INVALID_MESSAGE, "x").request_id(), Some(4));
        assert_eq!(Frame::ping().request_id(), None);
        assert_eq!(Frame::event(EventKind::Join, "a", "", 1).request_id(), None);
    }
}
