//! In-memory transport.
//!
//! A connected pair of [`MemoryConnection`]s backed by unbounded channels.
//! Frames pass through the codec so size limits and encoding behave as on
//! the wire.

use async_trait::async_trait;
use bytes::Bytes;
use chitchat_protocol::{codec, Frame};
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, TransportError};

/// One end of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryConnection {
    /// Create two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::generate(),
                tx: Some(a_tx),
                rx: b_rx,
            },
            Self {
                id: ConnectionId::generate(),
                tx: Some(b_tx),
                rx: a_rx,
            },
        )
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.rx.recv().await {
            Some(data) => Ok(Some(codec::decode(&data)?)),
            None => Ok(None),
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        let data = codec::encode(&frame)?;
        tx.send(data).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_exchanges_frames() {
        let (mut a, mut b) = MemoryConnection::pair();

        a.send(Frame::join(1, "alice")).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(Frame::join(1, "alice")));

        b.send(Frame::ack(1)).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Some(Frame::ack(1)));
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (mut a, mut b) = MemoryConnection::pair();

        a.close().await.unwrap();
        assert!(!a.is_open());
        assert!(matches!(
            a.send(Frame::ping()).await,
            Err(TransportError::ConnectionClosed)
        ));
        assert_eq!(b.recv().await.unwrap(), None);
    }
}
