//! Client-side chat session.
//!
//! Wraps a [`Connection`], numbers requests, and folds the Lamport stamp of
//! every received event into a [`LocalClock`]. Sending never advances the
//! local clock: all ordering is assigned by the server.

use chitchat_core::LocalClock;
use chitchat_protocol::{EventKind, Frame};
use chitchat_transport::{Connection, TransportError};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, warn};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server refused a request.
    #[error("request rejected ({code}): {message}")]
    Rejected { code: u16, message: String },

    /// The server closed the connection.
    #[error("server closed the connection")]
    Closed,
}

/// A received event after clock synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub kind: EventKind,
    pub client_id: String,
    pub text: String,
    /// Server-assigned stamp.
    pub lamport: u64,
    /// Local clock after applying the stamp.
    pub local_clock: u64,
}

impl std::fmt::Display for ReceivedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            EventKind::Chat => write!(
                f,
                "[{}] {}: {} (lamport {}, local {})",
                self.kind, self.client_id, self.text, self.lamport, self.local_clock
            ),
            EventKind::Join | EventKind::Leave => write!(
                f,
                "[{}] {} (lamport {}, local {})",
                self.kind, self.text, self.lamport, self.local_clock
            ),
        }
    }
}

/// Something the server sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Event(ReceivedEvent),
    Ack { id: u64 },
    Rejected { id: u64, code: u16, message: String },
    Closed,
}

/// A chat session over any frame connection.
pub struct ChatSession<C> {
    conn: C,
    client_id: String,
    clock: LocalClock,
    next_request: u64,
    pending: VecDeque<Incoming>,
}

impl<C: Connection> ChatSession<C> {
    #[must_use]
    pub fn new(conn: C, client_id: impl Into<String>) -> Self {
        Self {
            conn,
            client_id: client_id.into(),
            clock: LocalClock::new(),
            next_request: 1,
            pending: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Current local Lamport clock.
    #[must_use]
    pub fn local_clock(&self) -> u64 {
        self.clock.value()
    }

    fn request_id(&mut self) -> u64 {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    /// Send a Join request. Returns its request id.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be sent.
    pub async fn join(&mut self) -> Result<u64, ClientError> {
        let id = self.request_id();
        self.conn.send(Frame::join(id, self.client_id.clone())).await?;
        Ok(id)
    }

    /// Send a Publish request. Returns its request id.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be sent.
    pub async fn publish(&mut self, text: &str) -> Result<u64, ClientError> {
        let id = self.request_id();
        self.conn
            .send(Frame::publish(id, self.client_id.clone(), text.as_bytes().to_vec()))
            .await?;
        Ok(id)
    }

    /// Send a Leave request. Returns its request id.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be sent.
    pub async fn leave(&mut self) -> Result<u64, ClientError> {
        let id = self.request_id();
        self.conn.send(Frame::leave(id, self.client_id.clone())).await?;
        Ok(id)
    }

    /// Join and wait for the server's acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns an error if the join is rejected or the connection fails.
    pub async fn join_and_wait(&mut self) -> Result<(), ClientError> {
        let id = self.join().await?;
        self.wait_for(id).await
    }

    /// Leave and wait for the server's acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails before the ack arrives.
    pub async fn leave_and_wait(&mut self) -> Result<(), ClientError> {
        let id = self.leave().await?;
        self.wait_for(id).await
    }

    /// Read until the response to request `id` arrives.
    ///
    /// Anything else received meanwhile is kept for [`next`](Self::next).
    async fn wait_for(&mut self, id: u64) -> Result<(), ClientError> {
        loop {
            match self.read().await? {
                Incoming::Ack { id: acked } if acked == id => return Ok(()),
                Incoming::Rejected {
                    id: failed,
                    code,
                    message,
                } if failed == id => return Err(ClientError::Rejected { code, message }),
                Incoming::Closed => return Err(ClientError::Closed),
                other => self.pending.push_back(other),
            }
        }
    }

    /// Next thing received from the server.
    ///
    /// Cancel-safe: nothing is lost if the future is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails.
    pub async fn next(&mut self) -> Result<Incoming, ClientError> {
        if let Some(incoming) = self.pending.pop_front() {
            return Ok(incoming);
        }
        self.read().await
    }

    async fn read(&mut self) -> Result<Incoming, ClientError> {
        loop {
            let Some(frame) = self.conn.recv().await? else {
                return Ok(Incoming::Closed);
            };

            match frame {
                Frame::Event {
                    kind,
                    client_id,
                    text,
                    lamport,
                } => {
                    let local_clock = self.clock.on_receive(lamport);
                    debug!(kind = %kind, client = %client_id, lamport, local_clock, "Event");
                    return Ok(Incoming::Event(ReceivedEvent {
                        kind,
                        client_id,
                        text,
                        lamport,
                        local_clock,
                    }));
                }
                Frame::Ack { id } => return Ok(Incoming::Ack { id }),
                Frame::Error { id, code, message } => {
                    return Ok(Incoming::Rejected { id, code, message })
                }
                Frame::Ping { timestamp } => {
                    self.conn.send(Frame::pong(timestamp)).await?;
                }
                Frame::Pong { .. } => {}
                other => {
                    warn!(frame_type = ?other.frame_type(), "Unexpected frame from server");
                }
            }
        }
    }

    /// Close the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.conn.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chitchat_protocol::codes;
    use chitchat_transport::MemoryConnection;

    #[tokio::test]
    async fn test_clock_follows_received_events() {
        let (client, mut server) = MemoryConnection::pair();
        let mut session = ChatSession::new(client, "alice");

        server
            .send(Frame::event(EventKind::Join, "bob", "bob joined the chat", 9))
            .await
            .unwrap();
        server
            .send(Frame::event(EventKind::Chat, "bob", "hey", 3))
            .await
            .unwrap();

        match session.next().await.unwrap() {
            Incoming::Event(event) => {
                assert_eq!(event.lamport, 9);
                assert_eq!(event.local_clock, 10);
            }
            other => panic!("Expected event, got {:?}", other),
        }
        match session.next().await.unwrap() {
            Incoming::Event(event) => assert_eq!(event.local_clock, 11),
            other => panic!("Expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sending_does_not_tick() {
        let (client, mut server) = MemoryConnection::pair();
        let mut session = ChatSession::new(client, "alice");

        let id = session.publish("hi").await.unwrap();
        assert_eq!(session.local_clock(), 0);
        assert_eq!(
            server.recv().await.unwrap(),
            Some(Frame::publish(id, "alice", b"hi".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_join_and_wait_keeps_early_events() {
        let (client, mut server) = MemoryConnection::pair();
        let mut session = ChatSession::new(client, "alice");

        let peer = tokio::spawn(async move {
            let Some(Frame::Join { id, .. }) = server.recv().await.unwrap() else {
                panic!("Expected Join");
            };
            server
                .send(Frame::event(EventKind::Chat, "bob", "early", 4))
                .await
                .unwrap();
            server.send(Frame::ack(id)).await.unwrap();
            server
        });

        session.join_and_wait().await.unwrap();
        let _server = peer.await.unwrap();

        match session.next().await.unwrap() {
            Incoming::Event(event) => {
                assert_eq!(event.text, "early");
                assert_eq!(event.local_clock, 5);
            }
            other => panic!("Expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_rejected() {
        let (client, mut server) = MemoryConnection::pair();
        let mut session = ChatSession::new(client, "");

        let peer = tokio::spawn(async move {
            let frame = server.recv().await.unwrap().unwrap();
            let id = frame.request_id().unwrap();
            server
                .send(Frame::error(id, codes::JOIN_REJECTED, "client id cannot be empty"))
                .await
                .unwrap();
            server
        });

        let err = session.join_and_wait().await.unwrap_err();
        let _server = peer.await.unwrap();
        assert!(matches!(
            err,
            ClientError::Rejected { code: codes::JOIN_REJECTED, .. }
        ));
    }

    #[tokio::test]
    async fn test_publish_rejection_surfaces() {
        let (client, mut server) = MemoryConnection::pair();
        let mut session = ChatSession::new(client, "alice");

        let id = session.publish(&"x".repeat(200)).await.unwrap();
        server.recv().await.unwrap();
        server
            .send(Frame::error(id, codes::INVALID_MESSAGE, "message too long (max 128 chars)"))
            .await
            .unwrap();

        assert_eq!(
            session.next().await.unwrap(),
            Incoming::Rejected {
                id,
                code: codes::INVALID_MESSAGE,
                message: "message too long (max 128 chars)".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_server_close() {
        let (client, mut server) = MemoryConnection::pair();
        let mut session = ChatSession::new(client, "alice");

        server.close().await.unwrap();
        drop(server);
        assert_eq!(session.next().await.unwrap(), Incoming::Closed);
        assert!(matches!(
            session.leave_and_wait().await,
            Err(ClientError::Transport(_)) | Err(ClientError::Closed)
        ));
    }

    #[test]
    fn test_event_display() {
        let event = ReceivedEvent {
            kind: EventKind::Chat,
            client_id: "alice".into(),
            text: "hi".into(),
            lamport: 3,
            local_clock: 4,
        };
        assert_eq!(event.to_string(), "[CHAT] alice: hi (lamport 3, local 4)");
    }
}
