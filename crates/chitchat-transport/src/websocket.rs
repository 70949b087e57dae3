//! WebSocket client transport.
//!
//! Connects to a ChitChat server with tokio-tungstenite and exchanges
//! length-prefixed frames in binary messages.

use async_trait::async_trait;
use bytes::BytesMut;
use chitchat_protocol::{Frame, FrameCodec};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::traits::{Connection, ConnectionId, TransportError};

/// A client-side WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
    is_open: bool,
    read_buffer: BytesMut,
    codec: FrameCodec,
}

impl WebSocketConnection {
    /// Connect to `url` (e.g. `ws://127.0.0.1:50051/ws`).
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection or handshake fails.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        debug!(url = %url, "WebSocket handshake completed");

        Ok(Self {
            id: ConnectionId::generate(),
            stream,
            url: url.to_string(),
            is_open: true,
            read_buffer: BytesMut::with_capacity(4096),
            codec: FrameCodec::new(),
        })
    }

    fn closed(&mut self) -> Result<Option<Frame>, TransportError> {
        self.is_open = false;
        Ok(None)
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = self.codec.decode_from(&mut self.read_buffer)? {
                return Ok(Some(frame));
            }

            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    self.read_buffer.extend_from_slice(&data);
                }
                Some(Ok(Message::Text(text))) => {
                    self.read_buffer.extend_from_slice(text.as_bytes());
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return self.closed();
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) | None => {
                    debug!("WebSocket stream ended");
                    return self.closed();
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let data = self.codec.encode(&frame)?;
        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(());
        }

        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.url.clone())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
