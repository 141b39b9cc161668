//! Broadcast Hub
//!
//! Fan-out of round events to every connected session, in the order
//! the engine emitted them. Delivery is best-effort and non-blocking:
//! each recipient has its own bounded mpsc channel, and `try_send`
//! means one slow or vanished client can never stall the tick loop or
//! delay the others.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::game::ledger::SessionId;
use crate::network::protocol::ServerMessage;

/// Per-recipient outbound queue depth. A client that falls this many
/// messages behind starts losing ticks, not gaining latency.
pub const CLIENT_CHANNEL_CAPACITY: usize = 64;

/// Subscriber registry for round event fan-out.
#[derive(Default)]
pub struct BroadcastHub {
    subscribers: RwLock<BTreeMap<SessionId, mpsc::Sender<ServerMessage>>>,
}

impl BroadcastHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's outbound channel. Registration is
    /// independent of game state; the caller sends the Welcome
    /// snapshot itself, before ticks start flowing here.
    pub async fn subscribe(&self, session_id: SessionId, sender: mpsc::Sender<ServerMessage>) {
        self.subscribers.write().await.insert(session_id, sender);
    }

    /// Remove a session. Returns true if it was subscribed.
    pub async fn unsubscribe(&self, session_id: &SessionId) -> bool {
        self.subscribers.write().await.remove(session_id).is_some()
    }

    /// Deliver `message` to every subscriber, at most once each.
    /// Ordering per recipient is the emit order (mpsc preserves it).
    pub async fn publish(&self, message: &ServerMessage) {
        let subscribers = self.subscribers.read().await;
        for (session_id, sender) in subscribers.iter() {
            if let Err(e) = sender.try_send(message.clone()) {
                // Full or closed channel: drop for this recipient only.
                debug!(
                    "dropping broadcast for session {}: {}",
                    hex::encode(&session_id[..4]),
                    e
                );
            }
        }
    }

    /// Number of subscribed sessions.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_publish_unsubscribe() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = mpsc::channel(8);
        let id = [1; 16];

        hub.subscribe(id, tx).await;
        assert_eq!(hub.subscriber_count().await, 1);

        hub.publish(&ServerMessage::Multiplier { value: 150 }).await;
        match rx.recv().await.unwrap() {
            ServerMessage::Multiplier { value } => assert_eq!(value, 150),
            other => panic!("wrong message: {:?}", other),
        }

        assert!(hub.unsubscribe(&id).await);
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = mpsc::channel(8);
        hub.subscribe([1; 16], tx).await;

        for value in [101, 102, 103] {
            hub.publish(&ServerMessage::Multiplier { value }).await;
        }

        for expected in [101, 102, 103] {
            match rx.recv().await.unwrap() {
                ServerMessage::Multiplier { value } => assert_eq!(value, expected),
                other => panic!("wrong message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_others() {
        let hub = BroadcastHub::new();

        // A full 1-slot channel that nobody drains.
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        slow_tx
            .try_send(ServerMessage::Multiplier { value: 1 })
            .unwrap();
        hub.subscribe([1; 16], slow_tx).await;

        let (ok_tx, mut ok_rx) = mpsc::channel(8);
        hub.subscribe([2; 16], ok_tx).await;

        // Publish completes without waiting on the stuck recipient.
        hub.publish(&ServerMessage::Multiplier { value: 200 }).await;

        match ok_rx.recv().await.unwrap() {
            ServerMessage::Multiplier { value } => assert_eq!(value, 200),
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_skipped() {
        let hub = BroadcastHub::new();
        let (dead_tx, dead_rx) = mpsc::channel(8);
        drop(dead_rx);
        hub.subscribe([1; 16], dead_tx).await;

        let (ok_tx, mut ok_rx) = mpsc::channel(8);
        hub.subscribe([2; 16], ok_tx).await;

        hub.publish(&ServerMessage::Multiplier { value: 300 }).await;
        assert!(ok_rx.recv().await.is_some());
    }
}
