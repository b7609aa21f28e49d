use crate::callbacks::WebSocketCallbacks;
use crate::connection;
use crate::hub::Hub;
use std::sync::Arc;
use tracing::{info, warn};

/// Accepts raw TCP connections on `addr` and runs the upgrade handshake and
/// connection actor for each one. Bound as its own listener rather than
/// hooked into `pingora_proxy::ProxyHttp` directly: pingora's proxy hooks
/// are built around forwarding to an upstream, not terminating a protocol
/// upgrade in-process, so a route whose path ends in a WebSocket upgrade is
/// proxied to this listener the same way any other upstream is — the hub
/// owns the actual frame I/O.
pub async fn serve<F>(addr: &str, hub: Arc<Hub>, callbacks_factory: F) -> std::io::Result<()>
where
    F: Fn() -> Arc<dyn WebSocketCallbacks> + Send + Sync + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "websocket hub listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let hub = Arc::clone(&hub);
        let callbacks = callbacks_factory();
        tokio::spawn(async move {
            if let Err(err) = connection::accept_and_run(stream, hub, callbacks).await {
                warn!(%peer, error = %err, "websocket connection ended with an error");
            }
        });
    }
}
