//! # chitchat-protocol
//!
//! Wire protocol definitions for the ChitChat broadcast chat service.
//!
//! ## Frame Types
//!
//! - `Join` / `Leave` - Session lifecycle
//! - `Publish` - Send a chat message
//! - `Event` - Lamport-stamped broadcast (JOIN, CHAT, LEAVE)
//! - `Ack` / `Error` - Request acknowledgments
//!
//! ## Example
//!
//! ```rust
//! use chitchat_protocol::{codec, Frame};
//!
//! let frame = Frame::publish(1, "alice", "hello".as_bytes().to_vec());
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use frames::{codes, EventKind, Frame};
pub use version::{Version, PROTOCOL_VERSION};
