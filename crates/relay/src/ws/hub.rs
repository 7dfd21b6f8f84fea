// Fan-out of outbound messages to every open connection.
//
// Each connection registers the sending half of its outbound queue; its socket
// task drains the receiving half. A send only fails once that task has gone
// away, so a failed send prunes the channel and delivery carries on.

use std::{collections::HashMap, future::Future, sync::Arc};

use drawsync_common::protocol::ws::ServerMessage;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::metrics;

pub type Outbound = mpsc::UnboundedSender<Arc<ServerMessage>>;

#[derive(Debug, Default)]
pub struct BroadcastHub {
    channels: RwLock<HashMap<Uuid, Outbound>>,
}

impl BroadcastHub {
    #[cfg(test)]
    pub async fn join(&self, connection_id: Uuid, sender: Outbound) {
        self.channels.write().await.insert(connection_id, sender);
    }

    /// Join with `first` already queued on the channel.
    ///
    /// `first` is awaited under the write lock: broadcasts that start later
    /// queue behind it, and ones already past their recipient snapshot
    /// happened before it was built. Returns false if the receiver is gone.
    pub async fn join_with<F>(&self, connection_id: Uuid, sender: Outbound, first: F) -> bool
    where
        F: Future<Output = ServerMessage>,
    {
        let mut guard = self.channels.write().await;
        if sender.send(Arc::new(first.await)).is_err() {
            return false;
        }
        guard.insert(connection_id, sender);
        true
    }

    /// Returns false when the connection was not (or no longer) joined.
    pub async fn leave(&self, connection_id: Uuid) -> bool {
        self.channels.write().await.remove(&connection_id).is_some()
    }

    /// Deliver to every joined channel; returns how many accepted the message.
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let recipients = {
            let guard = self.channels.read().await;
            guard.iter().map(|(id, sender)| (*id, sender.clone())).collect::<Vec<_>>()
        };

        let message = Arc::new(message);
        let mut sent_count = 0;
        let mut dead = Vec::new();
        for (connection_id, sender) in recipients {
            if sender.send(Arc::clone(&message)).is_ok() {
                sent_count += 1;
            } else {
                dead.push(connection_id);
            }
        }

        if !dead.is_empty() {
            self.prune(&dead).await;
        }

        sent_count
    }

    /// Deliver to one channel only.
    pub async fn send_to(&self, connection_id: Uuid, message: ServerMessage) -> bool {
        let Some(sender) = self.channels.read().await.get(&connection_id).cloned() else {
            return false;
        };

        if sender.send(Arc::new(message)).is_ok() {
            true
        } else {
            self.prune(&[connection_id]).await;
            false
        }
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    async fn prune(&self, connection_ids: &[Uuid]) {
        let mut guard = self.channels.write().await;
        for connection_id in connection_ids {
            // The id may have been re-joined with a live sender since the send failed.
            if guard.get(connection_id).is_some_and(|sender| sender.is_closed()) {
                guard.remove(connection_id);
                metrics::increment_dropped_channels();
                debug!(connection_id = %connection_id, "pruned closed outbound channel");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use drawsync_common::protocol::ws::ServerMessage;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::BroadcastHub;

    fn leave_message(user_id: &str) -> ServerMessage {
        ServerMessage::UserLeave { user_id: user_id.to_string() }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_joined_channel() {
        let hub = BroadcastHub::default();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.join(Uuid::new_v4(), tx_a).await;
        hub.join(Uuid::new_v4(), tx_b).await;

        assert_eq!(hub.broadcast(leave_message("u1")).await, 2);

        assert_eq!(*rx_a.recv().await.expect("a should receive"), leave_message("u1"));
        assert_eq!(*rx_b.recv().await.expect("b should receive"), leave_message("u1"));
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_the_others() {
        let hub = BroadcastHub::default();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        drop(rx_dead);

        hub.join(Uuid::new_v4(), tx_a).await;
        let dead_id = Uuid::new_v4();
        hub.join(dead_id, tx_dead).await;
        hub.join(Uuid::new_v4(), tx_b).await;

        let delivered = hub.broadcast(leave_message("u1")).await;

        assert_eq!(delivered, 2);
        assert_eq!(*rx_a.recv().await.expect("a should receive"), leave_message("u1"));
        assert_eq!(*rx_b.recv().await.expect("b should receive"), leave_message("u1"));
        assert_eq!(hub.len().await, 2, "the dead channel is pruned on discovery");
        assert!(!hub.leave(dead_id).await);
    }

    #[tokio::test]
    async fn send_to_targets_a_single_channel() {
        let hub = BroadcastHub::default();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = Uuid::new_v4();
        hub.join(a, tx_a).await;
        hub.join(Uuid::new_v4(), tx_b).await;

        assert!(hub.send_to(a, leave_message("u1")).await);

        assert_eq!(*rx_a.recv().await.expect("a should receive"), leave_message("u1"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_closed_or_unknown_channel_is_contained() {
        let hub = BroadcastHub::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        hub.join(id, tx).await;
        drop(rx);

        assert!(!hub.send_to(id, leave_message("u1")).await);
        assert_eq!(hub.len().await, 0);
        assert!(!hub.send_to(Uuid::new_v4(), leave_message("u1")).await);
    }

    #[tokio::test]
    async fn leave_stops_delivery_and_is_idempotent() {
        let hub = BroadcastHub::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        hub.join(id, tx).await;

        assert!(hub.leave(id).await);
        assert!(!hub.leave(id).await);
        assert_eq!(hub.broadcast(leave_message("u1")).await, 0);
        assert!(rx.recv().await.is_none(), "sender is dropped once the hub forgets it");
    }

    #[tokio::test]
    async fn join_with_queues_the_first_message_ahead_of_broadcasts() {
        let hub = Arc::new(BroadcastHub::default());
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        hub.join(Uuid::new_v4(), tx_a).await;

        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let racing = Arc::clone(&hub);
        let joined = hub
            .join_with(Uuid::new_v4(), tx_b, async move {
                // Runs under the write lock, so this broadcast cannot reach b first.
                let pending = tokio::spawn(async move { racing.broadcast(leave_message("u1")).await });
                tokio::task::yield_now().await;
                assert!(!pending.is_finished());
                ServerMessage::LocksUpdate { locks: Default::default() }
            })
            .await;
        assert!(joined);

        assert_eq!(
            *rx_b.recv().await.expect("b should receive its first message"),
            ServerMessage::LocksUpdate { locks: Default::default() }
        );
        assert_eq!(*rx_b.recv().await.expect("b should receive the broadcast"), leave_message("u1"));
    }

    #[tokio::test]
    async fn join_with_a_closed_receiver_does_not_register() {
        let hub = BroadcastHub::default();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let joined = hub
            .join_with(Uuid::new_v4(), tx, async { leave_message("u1") })
            .await;

        assert!(!joined);
        assert_eq!(hub.len().await, 0);
    }

    #[tokio::test]
    async fn broadcast_shares_one_allocation_across_recipients() {
        let hub = BroadcastHub::default();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.join(Uuid::new_v4(), tx_a).await;
        hub.join(Uuid::new_v4(), tx_b).await;

        hub.broadcast(ServerMessage::XmlUpdate { xml: "<x/>".repeat(1024), by: None }).await;

        let a = rx_a.recv().await.expect("a should receive");
        let b = rx_b.recv().await.expect("b should receive");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
