//! # chitchat-transport
//!
//! Transport abstraction layer for ChitChat clients.
//!
//! - **WebSocket** - Talks to a running `chitchat-server`
//! - **Memory** - Connected in-process pair for tests
//!
//! ```rust,ignore
//! use chitchat_transport::{Connection, WebSocketConnection};
//!
//! let mut conn = WebSocketConnection::connect("ws://127.0.0.1:50051/ws").await?;
//! while let Some(frame) = conn.recv().await? {
//!     // Process frame
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::MemoryConnection;
pub use traits::{Connection, ConnectionId, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
