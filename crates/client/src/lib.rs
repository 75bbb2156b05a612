//! Chatwire client - persistent WebSocket session core.
//!
//! This crate maintains a single authenticated WebSocket connection to the
//! chatwire backend and exposes an ordered, deduplicated message log plus a
//! connection-status snapshot to any number of consumers. Rendering, login
//! flows, and the REST layer live elsewhere; they talk to this core only
//! through [`ws::WsHandle`].

pub mod auth;
pub mod config;
pub mod stores;
pub mod ws;

pub use auth::Credential;
pub use chatwire_shared::{Message, Sender};
pub use config::{ClientConfig, ReconnectConfig};
pub use ws::{ConnectionStatus, SendError, WsEvent, WsHandle, WsManager};
