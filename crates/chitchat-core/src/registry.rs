//! Session registry.
//!
//! Maps client ids to the outbound half of each session's event buffer.
//! All access goes through a single lock; callers only ever see
//! [`SessionHandle`] snapshots, never the map itself.

use crate::event::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// A client identifier.
pub type ClientId = String;

/// Sending half of a session's event buffer.
pub type EventSender = mpsc::Sender<Arc<Event>>;

/// Why a single delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The recipient's buffer is full.
    #[error("outbound buffer full")]
    Full,

    /// The recipient's feed has been dropped.
    #[error("delivery path closed")]
    Closed,
}

/// A registered session.
#[derive(Debug)]
struct Session {
    generation: u64,
    outbound: EventSender,
}

/// Point-in-time view of one session, used for fan-out.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    client_id: ClientId,
    generation: u64,
    outbound: EventSender,
}

impl SessionHandle {
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue an event for this session without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is full or the feed is gone.
    pub fn deliver(&self, event: Arc<Event>) -> Result<(), DeliveryError> {
        self.outbound.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Outcome of [`SessionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Generation assigned to the new session.
    pub generation: u64,
    /// Generation of the session that was overwritten, if any.
    pub replaced: Option<u64>,
}

/// Registry of connected sessions keyed by client id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ClientId, Session>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for `client_id`.
    ///
    /// A duplicate id overwrites the previous session (last writer wins).
    /// The replaced sender is dropped, which ends the old feed.
    pub fn register(&self, client_id: &str, outbound: EventSender) -> Registration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.sessions.write().insert(
            client_id.to_string(),
            Session {
                generation,
                outbound,
            },
        );

        debug!(client = %client_id, generation, "Session registered");

        Registration {
            generation,
            replaced: previous.map(|s| s.generation),
        }
    }

    /// Remove the session for `client_id`, if any.
    ///
    /// Returns `true` if a session was removed.
    pub fn unregister(&self, client_id: &str) -> bool {
        let removed = self.sessions.write().remove(client_id).is_some();
        if removed {
            debug!(client = %client_id, "Session unregistered");
        }
        removed
    }

    /// Remove the session for `client_id` only if it is still `generation`.
    ///
    /// Returns `true` if a session was removed.
    pub fn unregister_generation(&self, client_id: &str, generation: u64) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(client_id) {
            Some(session) if session.generation == generation => {
                sessions.remove(client_id);
                debug!(client = %client_id, generation, "Session unregistered");
                true
            }
            _ => false,
        }
    }

    /// Point-in-time view of every session. Order is unspecified.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .iter()
            .map(|(client_id, session)| SessionHandle {
                client_id: client_id.clone(),
                generation: session.generation,
                outbound: session.outbound.clone(),
            })
            .collect()
    }

    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.read().contains_key(client_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Ids of every registered client.
    #[must_use]
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Drop every session. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut sessions = self.sessions.write();
        let count = sessions.len();
        sessions.clear();
        count
    }
}
