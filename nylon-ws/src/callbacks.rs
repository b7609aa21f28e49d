use crate::connection::ConnectionId;
use async_trait::async_trait;

/// The host-side hooks invoked for every frame on an upgraded connection,
/// mirroring the `WebSocketCallbacks` descriptor a plugin supplies when it
/// calls upgrade during the request-filter phase. A plugin's own
/// open/message/close handlers are reached through its normal phase-dispatch
/// transport; this trait is the seam the hub drives them through.
#[async_trait]
pub trait WebSocketCallbacks: Send + Sync {
    async fn on_open(&self, _conn: ConnectionId) {}
    async fn on_message_text(&self, _conn: ConnectionId, _text: &str) {}
    async fn on_message_binary(&self, _conn: ConnectionId, _data: &[u8]) {}
    async fn on_close(&self, _conn: ConnectionId) {}
    async fn on_error(&self, _conn: ConnectionId, _error: &str) {}
}

/// Default callback set: logs at debug level and otherwise does nothing.
/// Used when a route upgrades without a plugin-supplied descriptor.
pub struct LoggingCallbacks;

#[async_trait]
impl WebSocketCallbacks for LoggingCallbacks {
    async fn on_open(&self, conn: ConnectionId) {
        tracing::debug!(connection = conn.0, "websocket connection opened");
    }

    async fn on_message_text(&self, conn: ConnectionId, text: &str) {
        tracing::debug!(connection = conn.0, bytes = text.len(), "websocket text frame");
    }

    async fn on_message_binary(&self, conn: ConnectionId, data: &[u8]) {
        tracing::debug!(connection = conn.0, bytes = data.len(), "websocket binary frame");
    }

    async fn on_close(&self, conn: ConnectionId) {
        tracing::debug!(connection = conn.0, "websocket connection closed");
    }

    async fn on_error(&self, conn: ConnectionId, error: &str) {
        tracing::warn!(connection = conn.0, error, "websocket connection error");
    }
}
