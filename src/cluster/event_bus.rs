//! Broadcast fan-out for cluster events.
//!
//! View implementations publish leadership and membership changes here;
//! subscribers (route policies, management tooling) receive them over
//! bounded broadcast channels.

use tokio::sync::broadcast;

/// Fans events out to every active subscriber.
///
/// Slow subscribers fall behind rather than block publishers: each receiver
/// has a bounded buffer and drops its oldest events on overflow. Subscribers
/// that lag must re-read current state instead of replaying history.
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Create a bus whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event, returning the number of subscribers it reached.
    pub fn publish(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(16)
    }
}
