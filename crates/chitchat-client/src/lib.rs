//! # chitchat-client
//!
//! Client library behind the `chitchat` binary: a [`ChatSession`] that
//! speaks the ChitChat protocol over any
//! [`Connection`](chitchat_transport::Connection) and keeps a local Lamport
//! clock in step with received events.

pub mod session;

pub use session::{ChatSession, ClientError, Incoming, ReceivedEvent};

/// Default server endpoint.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:50051/ws";

/// Whether an input line is the exit command (`/exit`, any case).
#[must_use]
pub fn is_exit_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("/exit")
}
