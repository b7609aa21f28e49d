//! End-to-end coverage for the room broadcast scenario: two real WebSocket
//! clients connect over TCP, both join a room, and a broadcast from one
//! reaches the other but not itself.

use futures_util::{SinkExt, StreamExt};
use nylon_ws::hub::Hub;
use nylon_ws::room::MemoryAdapter;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

struct RoomJoiningCallbacks {
    room: String,
    hub: Arc<Hub>,
}

#[async_trait::async_trait]
impl nylon_ws::WebSocketCallbacks for RoomJoiningCallbacks {
    async fn on_open(&self, conn: nylon_ws::ConnectionId) {
        self.hub.join_room(conn, &self.room).await;
    }

    async fn on_message_text(&self, conn: nylon_ws::ConnectionId, text: &str) {
        self.hub.broadcast_text(&self.room, text, conn).await;
    }
}

#[tokio::test]
async fn two_clients_join_a_room_and_broadcast_excludes_the_sender() {
    let hub = Arc::new(Hub::new(Arc::new(MemoryAdapter)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let hub = Arc::clone(&server_hub);
            tokio::spawn(async move {
                let callbacks: Arc<dyn nylon_ws::WebSocketCallbacks> =
                    Arc::new(RoomJoiningCallbacks { room: "lobby".to_string(), hub: Arc::clone(&hub) });
                let _ = nylon_ws::connection::accept_and_run(stream, hub, callbacks).await;
            });
        }
    });

    let (mut client1, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
    let (mut client2, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();

    // Give both accept tasks a moment to register and join the room.
    tokio::time::sleep(Duration::from_millis(50)).await;

    client1.send(Message::Text("hello room".into())).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), client2.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(received, Message::Text("hello room".into()));

    // client1 must not receive its own broadcast: the next frame it sees
    // within a short window should not be the echo of its own message.
    let own_echo = tokio::time::timeout(Duration::from_millis(200), client1.next()).await;
    assert!(own_echo.is_err(), "sender should not receive its own broadcast");
}
