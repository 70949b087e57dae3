//! # chitchat-core
//!
//! Session and broadcast engine for the ChitChat service.
//!
//! - **Clock** - Server Lamport clock and the client-side synchronizer
//! - **Registry** - Connected sessions keyed by client id
//! - **Broadcast** - Best-effort fan-out to every session
//! - **Hub** - Join / Publish / Leave lifecycle and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Join/Publish│────▶│     Hub     │────▶│ Broadcaster │
//! │    Leave    │     └─────────────┘     └─────────────┘
//! └─────────────┘       │        │               │
//!                       ▼        ▼               ▼
//!              ┌──────────────┐ ┌───────────────────┐
//!              │ LamportClock │ │  SessionRegistry  │
//!              └──────────────┘ └───────────────────┘
//! ```

pub mod broadcast;
pub mod clock;
pub mod event;
pub mod hub;
pub mod registry;

pub use broadcast::{Broadcaster, DeliveryReport};
pub use clock::{LamportClock, LocalClock};
pub use event::Event;
pub use hub::{Hub, HubConfig, HubError, HubStats, PublishAck, Subscription, MAX_MESSAGE_CHARS};
pub use registry::{ClientId, DeliveryError, SessionHandle, SessionRegistry};
