pub mod callbacks;
pub mod cluster_adapter;
pub mod connection;
pub mod hub;
pub mod redis_adapter;
pub mod room;
pub mod server;

pub use callbacks::{LoggingCallbacks, WebSocketCallbacks};
pub use connection::ConnectionId;
pub use hub::Hub;
pub use room::{BroadcastMessage, MemoryAdapter, RoomAdapter};
