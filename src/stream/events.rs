//! Typed stream events and the global event bus
//!
//! Every accepted transition produces one typed event that travels three
//! ways in order: onto the global bus, to the publisher callback, and to
//! every subscriber. Track arrivals, pulses and peer membership changes
//! ride the same enum so collaborators implement a single `on_event`.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use super::state::StateEvent;
use crate::track::TrackHandle;

/// Events emitted by a stream.
///
/// Cloning is cheap: payloads are handles and timestamps.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The stream was created and its owning task started
    Created { path: Arc<str>, time: Instant },

    /// First transition into Publishing
    Publish(StateEvent),

    /// A later transition into Publishing (history length > 1)
    Republish(StateEvent),

    /// The stream is waiting for a (new) publisher
    WaitPublish(StateEvent),

    /// The last subscriber left; delayed close armed
    WaitClose(StateEvent),

    /// Terminal close
    Close(StateEvent),

    /// Delivered to subscribers when the publisher drops
    PublisherLost(StateEvent),

    /// Periodic heartbeat for pulse-registered subscribers
    Pulse { time: Instant },

    /// A track became available
    TrackAdded(TrackHandle),

    /// A track was removed
    TrackRemoved(TrackHandle),

    /// Delivered to the publisher when a subscriber joins
    SubscriberJoined { subscriber: u64 },

    /// Delivered to the publisher when a subscriber leaves
    SubscriberLeft { subscriber: u64, remaining: usize },
}

/// Buffered one-writer-many-reader fan-out of stream events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; observers that lag skip ahead.
    pub fn publish(&self, event: StreamEvent) {
        // No receivers is not an error
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }
}
