//! Lamport clocks.
//!
//! [`LamportClock`] is the server-owned counter that stamps every event.
//! [`LocalClock`] is the client-side synchronizer that folds received
//! stamps into the client's own logical time.

use std::sync::atomic::{AtomicU64, Ordering};

/// Server-side logical clock.
///
/// Every call to [`tick`](Self::tick) returns a value that is unique and
/// exactly one greater than the previous one, regardless of how many tasks
/// call it concurrently.
#[derive(Debug, Default)]
pub struct LamportClock {
    value: AtomicU64,
}

impl LamportClock {
    /// Create a clock starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the clock and return the new value.
    pub fn tick(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently issued timestamp (0 before the first tick).
    #[must_use]
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Client-side clock synchronizer.
///
/// The clock only advances when an event is received; sending does not
/// tick it because all ordering is assigned by the server.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    value: u64,
}

impl LocalClock {
    /// Create a clock starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at `value`.
    #[must_use]
    pub fn with_value(value: u64) -> Self {
        Self { value }
    }

    /// Current local time.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Fold a received timestamp into the local clock.
    ///
    /// Sets the clock to `max(local, remote) + 1` and returns the new value.
    /// Saturates at `u64::MAX`.
    pub fn on_receive(&mut self, remote: u64) -> u64 {
        self.value = self.value.max(remote).saturating_add(1);
        self.value
    }
}
