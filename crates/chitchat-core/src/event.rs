//! Broadcast events.
//!
//! Events are created by the [`Hub`](crate::Hub) only, each stamped with a
//! fresh Lamport timestamp, and shared between recipients behind an `Arc`.

use chitchat_protocol::{EventKind, Frame};

/// An immutable, Lamport-stamped chat event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    origin: String,
    text: String,
    lamport: u64,
}

impl Event {
    pub(crate) fn new(kind: EventKind, origin: &str, text: String, lamport: u64) -> Self {
        Self {
            kind,
            origin: origin.to_string(),
            text,
            lamport,
        }
    }

    /// Notice text carried by a JOIN event.
    #[must_use]
    pub fn join_notice(client_id: &str) -> String {
        format!("{} joined the chat", client_id)
    }

    /// Notice text carried by a LEAVE event.
    #[must_use]
    pub fn leave_notice(client_id: &str) -> String {
        format!("{} left the chat", client_id)
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Client that caused the event.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Server-assigned Lamport timestamp.
    #[must_use]
    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    /// Wire representation of this event.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::event(self.kind, self.origin.clone(), self.text.clone(), self.lamport)
    }
}
