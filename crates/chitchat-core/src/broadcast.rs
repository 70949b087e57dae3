//! Best-effort broadcast engine.
//!
//! Fans a stamped event out to every registered session. Each delivery is
//! a non-blocking push into the recipient's own buffer, so one stalled or
//! broken recipient never holds up the others. Failures are logged and
//! counted; they are not retried and the failed session is not evicted.

use crate::event::Event;
use crate::registry::SessionRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Result of a single fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sessions the event was queued for.
    pub delivered: usize,
    /// Sessions whose delivery failed.
    pub failed: usize,
}

impl DeliveryReport {
    /// Number of sessions in the snapshot.
    #[must_use]
    pub fn recipients(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Broadcast engine over a shared [`SessionRegistry`].
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
    delivered_total: AtomicU64,
    failed_total: AtomicU64,
}

impl Broadcaster {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            delivered_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
        }
    }

    /// Deliver `event` to every session in the current snapshot.
    ///
    /// The registry lock is only held while taking the snapshot.
    pub fn broadcast(&self, event: &Arc<Event>) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for session in self.registry.snapshot() {
            match session.deliver(Arc::clone(event)) {
                Ok(()) => {
                    trace!(client = %session.client_id(), lamport = event.lamport(), "Delivered");
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(
                        client = %session.client_id(),
                        lamport = event.lamport(),
                        error = %e,
                        "Send failure"
                    );
                    report.failed += 1;
                }
            }
        }

        self.delivered_total
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed_total
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        report
    }

    /// Total successful deliveries since creation.
    #[must_use]
    pub fn delivered_total(&self) -> u64 {
        self.delivered_total.load(Ordering::Relaxed)
    }

    /// Total failed deliveries since creation.
    #[must_use]
    pub fn failed_total(&self) -> u64 {
        self.failed_total.load(Ordering::Relaxed)
    }
}
