//! Consumer-readable stores fed by the WebSocket receive path.

pub mod messages;

pub use messages::{MessageCache, SharedMessageCache};
