//! # Lifecycle bus.
//!
//! [`Bus`] carries [`Event`]s from the master's moving parts to whoever watches
//! them. It wraps one [`tokio::sync::broadcast`] ring buffer.
//!
//! ```text
//!   fork_worker ──┐
//!   monitor N   ──┼──► Bus ──► subscriber_listener ──► SubscriberSet
//!   kill_worker ──┤        └─► ClusterMaster::subscribe_events (tests, embedders)
//!   FileListener──┘
//! ```
//!
//! Publishing never waits. An event published while nobody listens is gone; a
//! receiver that falls more than `capacity` events behind sees
//! `RecvError::Lagged(n)` and resumes from the oldest event still buffered.

use tokio::sync::broadcast;

use super::event::Event;

/// Cloneable handle to the lifecycle ring buffer.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus buffering up to `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Hands `ev` to every current receiver. Never blocks.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// New receiver; it sees only events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
