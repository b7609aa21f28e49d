use crate::connection::{ConnectionHandle, ConnectionId, OutboundMessage};
use crate::room::{BroadcastMessage, RoomAdapter};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// The WebSocket broadcast hub: room membership and connection routing for
/// this process. One instance per `nylon-server` process; shared by `Arc`
/// with every connection actor and with whatever drives the connection
/// operations (`JoinRoom`, `BroadcastText`, ...) on a plugin's behalf.
///
/// `rooms` and `connections` are `dashmap`s rather than a single
/// `Mutex<HashMap<...>>`: membership changes and broadcasts both need
/// concurrent access sharded by room/connection, matching the per-room
/// sharded-lock requirement in the concurrency model.
pub struct Hub {
    adapter: Arc<dyn RoomAdapter>,
    rooms: DashMap<String, DashSet<ConnectionId>>,
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl Hub {
    pub fn new(adapter: Arc<dyn RoomAdapter>) -> Self {
        Self { adapter, rooms: DashMap::new(), connections: DashMap::new() }
    }

    /// Registers a freshly accepted connection's outbound channel. Called
    /// once by the connection actor before it starts reading frames.
    pub fn attach(&self, id: ConnectionId, handle: ConnectionHandle) {
        self.connections.insert(id, handle);
    }

    /// Idempotent: joining a room twice leaves membership unchanged.
    pub async fn join_room(&self, conn: ConnectionId, room: &str) {
        self.rooms.entry(room.to_string()).or_insert_with(DashSet::new).insert(conn);
        if let Err(err) = self.adapter.register_member(room, conn).await {
            tracing::warn!(room, connection = conn.0, error = %err, "room adapter failed to register member");
        }
    }

    /// Idempotent: leaving a room not joined is a no-op.
    pub async fn leave_room(&self, conn: ConnectionId, room: &str) {
        if let Some(members) = self.rooms.get(room) {
            members.remove(&conn);
            if members.is_empty() {
                drop(members);
                self.rooms.remove(room);
            }
        }
        if let Err(err) = self.adapter.unregister_member(room, conn).await {
            tracing::warn!(room, connection = conn.0, error = %err, "room adapter failed to unregister member");
        }
    }

    /// Releases every room membership for a connection. Called once, on
    /// close, so a disconnect can't leave stale membership behind.
    async fn leave_all(&self, conn: ConnectionId) {
        let rooms: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains(&conn))
            .map(|entry| entry.key().clone())
            .collect();
        for room in rooms {
            self.leave_room(conn, &room).await;
        }
    }

    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms.get(room).map(|m| m.iter().map(|c| *c).collect()).unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn send_text(&self, conn: ConnectionId, text: impl Into<String>) {
        if let Some(handle) = self.connections.get(&conn) {
            handle.send(OutboundMessage::Text(text.into()));
        }
    }

    pub fn send_binary(&self, conn: ConnectionId, data: Vec<u8>) {
        if let Some(handle) = self.connections.get(&conn) {
            handle.send(OutboundMessage::Binary(data));
        }
    }

    pub fn close(&self, conn: ConnectionId) {
        if let Some(handle) = self.connections.get(&conn) {
            handle.send(OutboundMessage::Close);
        }
    }

    /// Broadcasts to every member of `room` joined on this node, excluding
    /// `sender`, then tells the adapter to reach any other nodes.
    pub async fn broadcast_text(&self, room: &str, text: &str, sender: ConnectionId) {
        self.deliver_local(room, &BroadcastMessage::Text(text.to_string()), Some(sender));
        if let Err(err) = self.adapter.publish_remote(room, &BroadcastMessage::Text(text.to_string())).await {
            tracing::warn!(room, error = %err, "room adapter failed to publish broadcast");
        }
    }

    pub async fn broadcast_binary(&self, room: &str, data: Vec<u8>, sender: ConnectionId) {
        self.deliver_local(room, &BroadcastMessage::Binary(data.clone()), Some(sender));
        if let Err(err) = self.adapter.publish_remote(room, &BroadcastMessage::Binary(data)).await {
            tracing::warn!(room, error = %err, "room adapter failed to publish broadcast");
        }
    }

    /// Delivers a message that originated on this node or arrived from a
    /// peer node to every locally-held connection in `room`. `exclude` is
    /// `Some` for locally-originated broadcasts (sender-excluded) and `None`
    /// for messages relayed in from another node (the sender isn't a local
    /// connection, so there is nothing to exclude).
    pub fn deliver_local(&self, room: &str, message: &BroadcastMessage, exclude: Option<ConnectionId>) {
        let Some(members) = self.rooms.get(room) else { return };
        for member in members.iter() {
            let member = *member;
            if Some(member) == exclude {
                continue;
            }
            match message {
                BroadcastMessage::Text(text) => self.send_text(member, text.clone()),
                BroadcastMessage::Binary(data) => self.send_binary(member, data.clone()),
            }
        }
    }

    /// Removes a connection entirely: its outbound handle and every room it
    /// was in. Called once by the connection actor when the socket closes.
    pub async fn disconnect(&self, conn: ConnectionId) {
        self.leave_all(conn).await;
        self.connections.remove(&conn);
    }
}
