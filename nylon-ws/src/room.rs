use crate::connection::ConnectionId;
use async_trait::async_trait;
use nylon_core::error::NylonError;

/// A message fanned out to every member of a room.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// The part of room membership that differs between single-node and
/// multi-node deployments. Local delivery to connections held by this
/// process always goes through `Hub`'s own connection map; an adapter only
/// needs to decide whether membership and broadcasts are replicated beyond
/// this node.
///
/// The default methods make `MemoryAdapter` a one-line impl: a single
/// process has no peers to replicate membership to or receive broadcasts
/// from.
#[async_trait]
pub trait RoomAdapter: Send + Sync {
    async fn register_member(&self, _room: &str, _conn: ConnectionId) -> Result<(), NylonError> {
        Ok(())
    }

    async fn unregister_member(&self, _room: &str, _conn: ConnectionId) -> Result<(), NylonError> {
        Ok(())
    }

    /// Notify peer nodes that `message` was broadcast to `room` on this
    /// node. Local delivery has already happened by the time this is
    /// called; implementations only need to reach other nodes.
    async fn publish_remote(&self, _room: &str, _message: &BroadcastMessage) -> Result<(), NylonError> {
        Ok(())
    }
}

/// The single-node room adapter: membership lives entirely in `Hub`'s own
/// maps, so there is nothing for this adapter to do.
pub struct MemoryAdapter;

impl RoomAdapter for MemoryAdapter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_adapter_is_a_no_op() {
        let adapter = MemoryAdapter;
        adapter.register_member("lobby", ConnectionId(1)).await.unwrap();
        adapter.unregister_member("lobby", ConnectionId(1)).await.unwrap();
        adapter.publish_remote("lobby", &BroadcastMessage::Text("hi".into())).await.unwrap();
    }
}
