use crate::connection::ConnectionId;
use crate::hub::Hub;
use crate::redis_adapter::RedisAdapter;
use crate::room::{BroadcastMessage, RoomAdapter};
use async_trait::async_trait;
use nylon_core::error::NylonError;
use std::sync::Arc;

/// Same room/broadcast semantics as `RedisAdapter`, fanned out over a seed
/// list instead of one shared instance. Each seed is treated as an
/// independent redis-compatible peer that membership and broadcasts are
/// published/registered against directly, which gives the same guarantees
/// as the single-node adapter as long as the seeds themselves replicate
/// (e.g. a Redis Cluster or Sentinel set behind each seed address).
pub struct ClusterAdapter {
    seeds: Vec<Arc<RedisAdapter>>,
}

impl ClusterAdapter {
    /// Connects to every seed. As with `RedisAdapter`, call `start` once the
    /// `Hub` wrapping this adapter exists to begin relaying inbound
    /// broadcasts from each seed.
    pub async fn connect(nodes: &[String], key_prefix: &str, node_id: String) -> Result<Arc<Self>, NylonError> {
        let mut seeds = Vec::with_capacity(nodes.len());
        for node in nodes {
            let (host, port) = node.split_once(':').ok_or_else(|| {
                NylonError::ConfigError(format!("cluster node '{node}' must be host:port"))
            })?;
            let port: u16 = port
                .parse()
                .map_err(|_| NylonError::ConfigError(format!("cluster node '{node}' has a non-numeric port")))?;
            seeds.push(RedisAdapter::connect(host, port, None, 0, key_prefix, node_id.clone()).await?);
        }
        Ok(Arc::new(Self { seeds }))
    }

    pub fn start(&self, hub: Arc<Hub>) {
        for seed in &self.seeds {
            Arc::clone(seed).start(Arc::clone(&hub));
        }
    }
}

#[async_trait]
impl RoomAdapter for ClusterAdapter {
    async fn register_member(&self, room: &str, conn: ConnectionId) -> Result<(), NylonError> {
        for seed in &self.seeds {
            if let Err(err) = seed.register_member(room, conn).await {
                tracing::warn!(error = %err, "cluster seed unreachable for room registration");
            }
        }
        Ok(())
    }

    async fn unregister_member(&self, room: &str, conn: ConnectionId) -> Result<(), NylonError> {
        for seed in &self.seeds {
            if let Err(err) = seed.unregister_member(room, conn).await {
                tracing::warn!(error = %err, "cluster seed unreachable for room deregistration");
            }
        }
        Ok(())
    }

    async fn publish_remote(&self, room: &str, message: &BroadcastMessage) -> Result<(), NylonError> {
        for seed in &self.seeds {
            if let Err(err) = seed.publish_remote(room, message).await {
                tracing::warn!(error = %err, "cluster seed unreachable for broadcast publish");
            }
        }
        Ok(())
    }
}
