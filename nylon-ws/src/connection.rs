use crate::callbacks::WebSocketCallbacks;
use crate::hub::Hub;
use futures_util::{SinkExt, StreamExt};
use nylon_core::error::NylonError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Identifies one upgraded connection for the life of the hub process.
/// Assigned by `Hub` when a connection is accepted; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> ConnectionId {
    ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// What a caller (a room broadcast, a direct `SendText`/`SendBinary`, or a
/// `Close` operation) asks a connection's write-half to do next.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// The handle `Hub` holds per live connection: an unbounded channel into
/// the connection's write task. Send is fire-and-forget, so delivery is
/// at-most-once: if the connection closes mid-send the message is dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub(crate) tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ConnectionHandle {
    pub fn send(&self, message: OutboundMessage) {
        // A closed receiver means the connection already went away; the
        // caller asked for best-effort delivery, so a failed send is not an
        // error condition worth propagating.
        let _ = self.tx.send(message);
    }
}

/// Accepts one raw TCP connection already known to carry a WebSocket
/// upgrade request, completes the handshake, registers it with the hub, and
/// runs its read/write loop until the peer closes or errors.
pub async fn accept_and_run(
    stream: TcpStream,
    hub: Arc<Hub>,
    callbacks: Arc<dyn WebSocketCallbacks>,
) -> Result<(), NylonError> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| NylonError::WebSocketUpgradeFailed(e.to_string()))?;
    run(ws, hub, callbacks).await;
    Ok(())
}

/// Runs the per-connection actor over an already-upgraded stream. Split
/// from `accept_and_run` so tests (and any transport other than a raw
/// `TcpStream`, e.g. a stream handed off mid-upgrade by the proxy) can drive
/// it directly.
pub async fn run<S>(ws: WebSocketStream<S>, hub: Arc<Hub>, callbacks: Arc<dyn WebSocketCallbacks>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let id = next_connection_id();
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.attach(id, ConnectionHandle { tx });
    callbacks.on_open(id).await;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(OutboundMessage::Text(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundMessage::Binary(data)) => {
                        if sink.send(Message::Binary(data.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundMessage::Close) | None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        callbacks.on_message_text(id, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        callbacks.on_message_binary(id, &data).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        callbacks.on_error(id, &e.to_string()).await;
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    callbacks.on_close(id).await;
    hub.disconnect(id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::WebSocketCallbacks;
    use crate::room::MemoryAdapter;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCallbacks {
        texts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl WebSocketCallbacks for RecordingCallbacks {
        async fn on_message_text(&self, _conn: ConnectionId, text: &str) {
            self.texts.lock().unwrap().push(text.to_string());
        }
    }

    #[tokio::test]
    async fn connection_ids_are_unique_and_increasing() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert!(b.0 > a.0);
    }

    #[tokio::test]
    async fn echoes_a_text_frame_through_a_duplex_pipe() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let hub = Arc::new(Hub::new(Arc::new(MemoryAdapter)));
        let callbacks: Arc<RecordingCallbacks> = Arc::new(RecordingCallbacks::default());

        let server_ws = tokio_tungstenite::WebSocketStream::from_raw_socket(
            server_io,
            tokio_tungstenite::tungstenite::protocol::Role::Server,
            None,
        )
        .await;
        let server_hub = Arc::clone(&hub);
        let server_cb: Arc<dyn WebSocketCallbacks> = callbacks.clone();
        let server_task = tokio::spawn(run(server_ws, server_hub, server_cb));

        let mut client_ws = tokio_tungstenite::WebSocketStream::from_raw_socket(
            client_io,
            tokio_tungstenite::tungstenite::protocol::Role::Client,
            None,
        )
        .await;
        client_ws.send(Message::Text("hello".into())).await.unwrap();
        client_ws.send(Message::Close(None)).await.unwrap();
        let _ = client_ws.next().await;

        server_task.await.unwrap();
        assert_eq!(callbacks.texts.lock().unwrap().as_slice(), ["hello"]);
    }
}
