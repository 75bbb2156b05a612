//! WebSocket session core: one managed, authenticated connection.
//!
//! Consumers never touch the socket. They hold a [`WsHandle`] and observe
//! the session through status and message snapshots; all socket events and
//! consumer commands are serialized in the manager task's single loop.

pub mod connection;
pub mod manager;

pub use connection::{ConnectionStatus, SendError, WsEvent, WsHandle};
pub use manager::WsManager;
