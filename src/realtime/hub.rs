use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::ServerEvent;

/// Room-based broker: tracks which connections are subscribed to which rooms
/// and fans events out to them. Membership lives only in memory and is
/// rebuilt from client re-joins after a restart.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// conn_id -> outbound channel to that connection's socket task
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>>,

    /// room id -> member conn_ids. A set, so re-joining is a no-op and a
    /// connection never receives the same emission twice.
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                connections: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// A driver's private notification room.
    pub fn driver_room(driver_id: Uuid) -> String {
        format!("driver_{}", driver_id)
    }

    /// Deterministic pairwise chat room: both ends sort the same three ids
    /// and arrive at the same name regardless of argument order.
    pub fn private_chat_room(ride_id: Uuid, user_a: Uuid, user_b: Uuid) -> String {
        let mut parts = [ride_id.to_string(), user_a.to_string(), user_b.to_string()];
        parts.sort();
        parts.join("_")
    }

    /// Register a connection's outbound channel.
    pub async fn register(&self, conn_id: Uuid, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.inner.connections.write().await.insert(conn_id, tx);
    }

    /// Subscribe a connection to a room. Idempotent.
    pub async fn join(&self, room: &str, conn_id: Uuid) {
        self.inner
            .rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(conn_id);
    }

    /// Drop a connection and all of its memberships.
    pub async fn remove_connection(&self, conn_id: Uuid) {
        self.inner.connections.write().await.remove(&conn_id);

        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    /// Keep the connection's memberships alive for a grace window before
    /// reaping, so a transient network blip doesn't force a full re-join.
    pub fn schedule_removal(&self, conn_id: Uuid, grace: Duration) {
        let hub = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            hub.remove_connection(conn_id).await;
        });
    }

    /// Deliver an event to every live member of a room, at most once each.
    /// Members whose socket task is gone are pruned on the way.
    pub async fn emit_to_room(&self, room: &str, event: ServerEvent) {
        let members: Vec<Uuid> = {
            let rooms = self.inner.rooms.read().await;
            match rooms.get(room) {
                Some(members) => members.iter().copied().collect(),
                None => return,
            }
        };

        let mut dead = Vec::new();
        {
            let connections = self.inner.connections.read().await;
            for conn_id in members {
                match connections.get(&conn_id) {
                    Some(tx) if tx.send(event.clone()).is_ok() => {}
                    _ => dead.push(conn_id),
                }
            }
        }

        for conn_id in dead {
            self.remove_connection(conn_id).await;
        }
    }

    /// Deliver an event to a single connection (error acknowledgments).
    pub async fn emit_to_connection(&self, conn_id: Uuid, event: ServerEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(tx) = connections.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    pub async fn room_size(&self, room: &str) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_event(ride_id: Uuid) -> ServerEvent {
        ServerEvent::PassengerUpdated {
            ride_id,
            passengers: vec![],
        }
    }

    #[tokio::test]
    async fn test_double_join_delivers_once() {
        let hub = Hub::new();
        let conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();

        hub.register(conn, tx).await;
        hub.join("ride-1", conn).await;
        hub.join("ride-1", conn).await; // reconnect-style re-join

        hub.emit_to_room("ride-1", test_event(Uuid::new_v4())).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "second delivery of one emission");
    }

    #[tokio::test]
    async fn test_emit_reaches_members_only() {
        let hub = Hub::new();
        let (member, outsider) = (Uuid::new_v4(), Uuid::new_v4());
        let (member_tx, mut member_rx) = mpsc::unbounded_channel();
        let (outsider_tx, mut outsider_rx) = mpsc::unbounded_channel();

        hub.register(member, member_tx).await;
        hub.register(outsider, outsider_tx).await;
        hub.join("ride-1", member).await;
        hub.join("ride-2", outsider).await;

        hub.emit_to_room("ride-1", test_event(Uuid::new_v4())).await;

        assert!(member_rx.try_recv().is_ok());
        assert!(outsider_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_removed_connection_gets_nothing() {
        let hub = Hub::new();
        let conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();

        hub.register(conn, tx).await;
        hub.join("ride-1", conn).await;
        hub.remove_connection(conn).await;

        hub.emit_to_room("ride-1", test_event(Uuid::new_v4())).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(hub.room_size("ride-1").await, 0);
    }

    #[tokio::test]
    async fn test_dead_member_is_pruned_on_emit() {
        let hub = Hub::new();
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        hub.register(conn, tx).await;
        hub.join("ride-1", conn).await;
        drop(rx); // socket task gone, no explicit disconnect

        hub.emit_to_room("ride-1", test_event(Uuid::new_v4())).await;

        assert_eq!(hub.room_size("ride-1").await, 0);
    }

    #[test]
    fn test_private_chat_room_is_order_independent() {
        let ride = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let room_ab = Hub::private_chat_room(ride, a, b);
        let room_ba = Hub::private_chat_room(ride, b, a);

        assert_eq!(room_ab, room_ba);
        assert!(room_ab.contains(&ride.to_string()));
    }

    #[test]
    fn test_private_chat_rooms_disjoint_per_pair() {
        let ride = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert_ne!(
            Hub::private_chat_room(ride, a, b),
            Hub::private_chat_room(ride, a, c)
        );
    }
}
