//! Session lifecycle controller.
//!
//! The hub turns Join, Publish and Leave requests into registry mutations
//! and Lamport-stamped broadcasts.
//!
//! Disconnect asymmetry: an explicit [`Hub::leave`] always ticks the clock
//! and broadcasts a LEAVE event, even for ids that were never joined. An
//! implicit disconnect ([`Hub::disconnect`], the feed's connection went
//! away) only removes the session; no event is emitted, so other clients'
//! causal history does not record it.

use crate::broadcast::{Broadcaster, DeliveryReport};
use crate::clock::LamportClock;
use crate::event::Event;
use crate::registry::SessionRegistry;
use chitchat_protocol::EventKind;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Maximum chat message length in code points.
pub const MAX_MESSAGE_CHARS: usize = 128;

/// Default per-session buffer capacity.
pub const DEFAULT_SESSION_BUFFER: usize = 256;

/// Request validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// Join with an empty client id.
    #[error("client id cannot be empty")]
    EmptyClientId,

    /// Published text is not valid UTF-8.
    #[error("message is not valid UTF-8")]
    InvalidUtf8,

    /// Published text is longer than the limit.
    #[error("message too long (max {max} chars)")]
    MessageTooLong { max: usize },
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum chat message length in code points.
    pub max_message_chars: usize,
    /// Capacity of each session's outbound buffer.
    pub session_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_message_chars: MAX_MESSAGE_CHARS,
            session_buffer: DEFAULT_SESSION_BUFFER,
        }
    }
}

/// Boundary form of a Publish result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub accepted: bool,
    pub error: Option<String>,
}

impl<T> From<Result<T, HubError>> for PublishAck {
    fn from(result: Result<T, HubError>) -> Self {
        match result {
            Ok(_) => Self {
                accepted: true,
                error: None,
            },
            Err(e) => Self {
                accepted: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// A joined client's event feed.
///
/// The feed ends (`recv` returns `None`) once the session is removed from
/// the registry: explicit Leave, a newer Join with the same id, or hub
/// shutdown.
#[derive(Debug)]
pub struct Subscription {
    client_id: String,
    generation: u64,
    receiver: mpsc::Receiver<Arc<Event>>,
}

impl Subscription {
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Registry generation of this session.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.try_recv().ok()
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Current Lamport clock value.
    pub clock: u64,
    /// Registered sessions.
    pub sessions: usize,
    /// Successful deliveries since start.
    pub delivered: u64,
    /// Failed deliveries since start.
    pub delivery_failures: u64,
}

/// The session lifecycle controller.
pub struct Hub {
    clock: LamportClock,
    registry: Arc<SessionRegistry>,
    broadcaster: Broadcaster,
    /// Held across stamping and fan-out so every session buffer receives
    /// events in timestamp order.
    emit_lock: Mutex<()>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(mut config: HubConfig) -> Self {
        config.session_buffer = config.session_buffer.max(1);
        info!("Creating hub with config: {:?}", config);

        let registry = Arc::new(SessionRegistry::new());
        Self {
            clock: LamportClock::new(),
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            emit_lock: Mutex::new(()),
            config,
        }
    }

    /// Register `client_id` and broadcast its JOIN event.
    ///
    /// A duplicate id replaces the existing session; the old feed ends.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::EmptyClientId`] if `client_id` is empty.
    pub fn join(&self, client_id: &str) -> Result<Subscription, HubError> {
        if client_id.is_empty() {
            return Err(HubError::EmptyClientId);
        }

        let (sender, receiver) = mpsc::channel(self.config.session_buffer);
        let registration = self.registry.register(client_id, sender);
        if let Some(replaced) = registration.replaced {
            warn!(
                client = %client_id,
                replaced,
                generation = registration.generation,
                "Duplicate join, previous session replaced"
            );
        }
        info!(client = %client_id, "Connection");

        let (event, _) = self.emit(EventKind::Join, client_id, Event::join_notice(client_id));
        info!(client = %client_id, lamport = event.lamport(), "Join");

        Ok(Subscription {
            client_id: client_id.to_string(),
            generation: registration.generation,
            receiver,
        })
    }

    /// Implicit disconnect: the feed's delivery path closed.
    ///
    /// Removes the session only if it is still `generation`. Emits no
    /// event. Returns `true` if a session was removed.
    pub fn disconnect(&self, client_id: &str, generation: u64) -> bool {
        let removed = self.registry.unregister_generation(client_id, generation);
        if removed {
            info!(client = %client_id, "Disconnection (stream closed)");
        } else {
            debug!(client = %client_id, generation, "Disconnect of inactive session");
        }
        removed
    }

    /// Validate and broadcast a chat message.
    ///
    /// # Errors
    ///
    /// Returns an error if `text` is not UTF-8 or is too long; the clock is
    /// not ticked and nothing is broadcast.
    pub fn publish(&self, client_id: &str, text: &[u8]) -> Result<Arc<Event>, HubError> {
        let text = self.validate_message(text)?;

        let (event, _) = self.emit(EventKind::Chat, client_id, text.to_string());
        info!(
            client = %client_id,
            lamport = event.lamport(),
            text = %event.text(),
            "Message"
        );
        Ok(event)
    }

    /// [`publish`](Self::publish) in acknowledgment form.
    pub fn publish_ack(&self, client_id: &str, text: &[u8]) -> PublishAck {
        let result = self.publish(client_id, text);
        if let Err(e) = &result {
            debug!(client = %client_id, error = %e, "Publish rejected");
        }
        result.into()
    }

    /// Remove `client_id` and broadcast its LEAVE event.
    ///
    /// Ticks and broadcasts even if the client was never joined.
    pub fn leave(&self, client_id: &str) -> Arc<Event> {
        let was_joined = self.registry.unregister(client_id);

        let (event, _) = self.emit(EventKind::Leave, client_id, Event::leave_notice(client_id));
        info!(client = %client_id, lamport = event.lamport(), was_joined, "Leave");
        info!(client = %client_id, "Disconnection");
        event
    }

    /// Drop every session, ending all feeds.
    pub fn shutdown(&self) -> usize {
        let clients = self.registry.client_ids();
        let count = self.registry.clear();
        debug!(?clients, "Dropping sessions");
        info!(sessions = count, "Hub shut down");
        count
    }

    /// Current Lamport clock value.
    #[must_use]
    pub fn clock(&self) -> u64 {
        self.clock.current()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether `client_id` has a registered session.
    #[must_use]
    pub fn is_joined(&self, client_id: &str) -> bool {
        self.registry.contains(client_id)
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            clock: self.clock.current(),
            sessions: self.registry.len(),
            delivered: self.broadcaster.delivered_total(),
            delivery_failures: self.broadcaster.failed_total(),
        }
    }

    fn validate_message<'a>(&self, text: &'a [u8]) -> Result<&'a str, HubError> {
        let text = std::str::from_utf8(text).map_err(|_| HubError::InvalidUtf8)?;
        if text.chars().count() > self.config.max_message_chars {
            return Err(HubError::MessageTooLong {
                max: self.config.max_message_chars,
            });
        }
        Ok(text)
    }

    fn emit(&self, kind: EventKind, origin: &str, text: String) -> (Arc<Event>, DeliveryReport) {
        let _order = self.emit_lock.lock();

        let lamport = self.clock.tick();
        let event = Arc::new(Event::new(kind, origin, text, lamport));
        let report = self.broadcaster.broadcast(&event);

        debug!(
            kind = %kind,
            client = %origin,
            lamport,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast"
        );

        (event, report)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
