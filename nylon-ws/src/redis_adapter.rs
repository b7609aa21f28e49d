use crate::connection::ConnectionId;
use crate::hub::Hub;
use crate::room::{BroadcastMessage, RoomAdapter};
use async_trait::async_trait;
use nylon_core::error::NylonError;
use redis::AsyncCommands;
use std::sync::Arc;

/// Multi-node room membership and broadcast over a shared Redis instance.
/// Membership is recorded in `{prefix}:room:{room}` (a set of
/// `{node_id}:{connection_id}` members so two nodes never collide on the
/// same key); broadcasts publish to `{prefix}:bcast:{room}`, which every
/// node — including the one that sent it — subscribes to, filtering out
/// its own messages by the embedded node id so a sender's own node doesn't
/// double-deliver what it already delivered locally.
pub struct RedisAdapter {
    client: redis::Client,
    prefix: String,
    node_id: String,
}

impl RedisAdapter {
    /// Connects to `host:port`. The adapter is usable for membership/publish
    /// calls immediately; call `start` once the `Hub` it feeds exists to
    /// begin relaying other nodes' broadcasts in (the two are constructed in
    /// this order because `Hub::new` takes the adapter it dispatches to, so
    /// the adapter can't hold a `Hub` reference before it exists).
    /// `node_id` should be unique per process (a hostname plus pid is a
    /// reasonable default).
    pub async fn connect(
        host: &str,
        port: u16,
        password: Option<&str>,
        db: u8,
        key_prefix: &str,
        node_id: String,
    ) -> Result<Arc<Self>, NylonError> {
        let url = match password {
            Some(pw) => format!("redis://:{pw}@{host}:{port}/{db}"),
            None => format!("redis://{host}:{port}/{db}"),
        };
        let client = redis::Client::open(url).map_err(|e| NylonError::Internal(e.to_string()))?;
        Ok(Arc::new(Self { client, prefix: key_prefix.to_string(), node_id }))
    }

    /// Spawns the background subscriber that relays broadcasts from other
    /// nodes into `hub`. Call once, after the `Hub` wrapping this adapter
    /// exists.
    pub fn start(self: Arc<Self>, hub: Arc<Hub>) {
        self.spawn_subscriber(hub);
    }

    fn room_key(&self, room: &str) -> String {
        format!("{}:room:{}", self.prefix, room)
    }

    fn broadcast_channel(&self, room: &str) -> String {
        format!("{}:bcast:{}", self.prefix, room)
    }

    fn spawn_subscriber(self: Arc<Self>, hub: Arc<Hub>) {
        let pattern = format!("{}:bcast:*", self.prefix);
        tokio::spawn(async move {
            loop {
                match self.client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if let Err(err) = pubsub.psubscribe(&pattern).await {
                            tracing::warn!(error = %err, "redis psubscribe failed, retrying");
                        } else {
                            let mut stream = pubsub.on_message();
                            use futures_util::StreamExt;
                            while let Some(msg) = stream.next().await {
                                self.handle_inbound(&hub, msg);
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "redis connection for websocket fan-out failed, retrying");
                    }
                }
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        });
    }

    fn handle_inbound(&self, hub: &Arc<Hub>, msg: redis::Msg) {
        let channel: String = match msg.get_channel() {
            Ok(c) => c,
            Err(_) => return,
        };
        let Some(room) = channel.strip_prefix(&format!("{}:bcast:", self.prefix)) else { return };
        let payload: Vec<u8> = match msg.get_payload() {
            Ok(p) => p,
            Err(_) => return,
        };
        let Some((origin, body)) = split_envelope(&payload) else { return };
        if origin == self.node_id {
            // Already delivered locally at publish time.
            return;
        }
        let message = match body.split_first() {
            Some((b'T', rest)) => BroadcastMessage::Text(String::from_utf8_lossy(rest).into_owned()),
            Some((b'B', rest)) => BroadcastMessage::Binary(rest.to_vec()),
            _ => return,
        };
        hub.deliver_local(room, &message, None);
    }
}

/// `{node_id}\0{T|B}{body}` — cheap enough to not warrant pulling in a
/// serialization crate just to tag a pub/sub payload with its origin node.
fn build_envelope(node_id: &str, message: &BroadcastMessage) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(node_id.as_bytes());
    out.push(0);
    match message {
        BroadcastMessage::Text(text) => {
            out.push(b'T');
            out.extend_from_slice(text.as_bytes());
        }
        BroadcastMessage::Binary(data) => {
            out.push(b'B');
            out.extend_from_slice(data);
        }
    }
    out
}

fn split_envelope(payload: &[u8]) -> Option<(String, &[u8])> {
    let idx = payload.iter().position(|b| *b == 0)?;
    let origin = String::from_utf8(payload[..idx].to_vec()).ok()?;
    Some((origin, &payload[idx + 1..]))
}

#[async_trait]
impl RoomAdapter for RedisAdapter {
    async fn register_member(&self, room: &str, conn: ConnectionId) -> Result<(), NylonError> {
        let mut con = self.client.get_multiplexed_async_connection().await.map_err(|e| NylonError::Internal(e.to_string()))?;
        let member = format!("{}:{}", self.node_id, conn.0);
        con.sadd::<_, _, ()>(self.room_key(room), member).await.map_err(|e| NylonError::Internal(e.to_string()))
    }

    async fn unregister_member(&self, room: &str, conn: ConnectionId) -> Result<(), NylonError> {
        let mut con = self.client.get_multiplexed_async_connection().await.map_err(|e| NylonError::Internal(e.to_string()))?;
        let member = format!("{}:{}", self.node_id, conn.0);
        con.srem::<_, _, ()>(self.room_key(room), member).await.map_err(|e| NylonError::Internal(e.to_string()))
    }

    async fn publish_remote(&self, room: &str, message: &BroadcastMessage) -> Result<(), NylonError> {
        let mut con = self.client.get_multiplexed_async_connection().await.map_err(|e| NylonError::Internal(e.to_string()))?;
        let envelope = build_envelope(&self.node_id, message);
        con.publish::<_, _, ()>(self.broadcast_channel(room), envelope).await.map_err(|e| NylonError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_origin_and_body() {
        let envelope = build_envelope("node-a", &BroadcastMessage::Text("hi".into()));
        let (origin, body) = split_envelope(&envelope).unwrap();
        assert_eq!(origin, "node-a");
        assert_eq!(body, b"Thi");
    }
}
