//! Bridge from domain events to the listener broadcast channel.
//!
//! The [`BroadcastHub`] lives at the boundary between domain services and
//! transport concerns. Services emit typed [`ServerEvent`]s through the
//! [`EventSink`] trait; WebSocket handlers subscribe to the underlying
//! `tokio::sync::broadcast` channel and forward events to their peer.
//!
//! Per-listener FIFO ordering falls out of the channel: each subscriber
//! receives events in send order, and each WS handler writes to its socket
//! from a single task.

use tokio::sync::broadcast;

use crate::events::{EventSink, ServerEvent};

/// Fans domain events out to every subscribed listener connection.
#[derive(Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<ServerEvent>,
}

impl BroadcastHub {
    /// Creates a new hub with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Creates a hub wrapping an existing broadcast sender.
    pub fn with_sender(tx: broadcast::Sender<ServerEvent>) -> Self {
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    ///
    /// WebSocket handlers use this to subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<ServerEvent> {
        &self.tx
    }

    /// Number of currently subscribed receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastHub {
    fn broadcast(&self, event: ServerEvent) {
        if let Err(e) = self.tx.send(event) {
            log::trace!("[Hub] No broadcast receivers: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let hub = BroadcastHub::new(16);
        let mut rx = hub.subscribe();

        hub.broadcast(ServerEvent::QueueUpdated);
        hub.broadcast(ServerEvent::PlaybackStopped);

        assert_eq!(rx.recv().await.unwrap(), ServerEvent::QueueUpdated);
        assert_eq!(rx.recv().await.unwrap(), ServerEvent::PlaybackStopped);
    }

    #[test]
    fn broadcast_without_receivers_is_not_an_error() {
        let hub = BroadcastHub::new(16);
        // Must not panic or log at error level
        hub.broadcast(ServerEvent::QueueUpdated);
        assert_eq!(hub.receiver_count(), 0);
    }
}
