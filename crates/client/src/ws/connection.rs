//! Consumer-facing connection types: status, events, and the handle.

use std::sync::{Arc, RwLock};

use chatwire_shared::Message;
use tokio::sync::{broadcast, mpsc, watch};

use crate::auth::Credential;
use crate::stores::SharedMessageCache;

/// Connection state for the session. Exactly one value holds at any instant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Failed { reason: String },
}

impl ConnectionStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionStatus::Authenticated)
    }

    /// True while a socket is open or opening (including reconnect backoff).
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Authenticating
        )
    }
}

/// Events fanned out to subscribed consumers.
///
/// The message cache remains the source of truth; this stream only saves
/// consumers from polling it. A message event is sent after the message is
/// already visible in the cache.
#[derive(Debug, Clone)]
pub enum WsEvent {
    Message(Message),
    StatusChanged(ConnectionStatus),
}

/// Synchronous precondition failures from [`WsHandle::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The session is not authenticated; nothing was queued or sent.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The manager task is gone (all of its work is abandoned).
    #[error("session closed")]
    Closed,
}

/// Commands consumers enqueue for the manager task.
#[derive(Debug)]
pub(crate) enum Command {
    Connect(Credential),
    Send { content: String },
    RequestPortfolio,
    Disconnect,
    ClearMessages,
}

/// Cloneable handle for interacting with a session.
///
/// `connect` and `disconnect` enqueue work and return immediately;
/// completion is observed through status changes, not return values.
#[derive(Clone)]
pub struct WsHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    cache: SharedMessageCache,
    events: broadcast::Sender<WsEvent>,
    last_error: Arc<RwLock<Option<String>>>,
}

impl WsHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        status: watch::Receiver<ConnectionStatus>,
        cache: SharedMessageCache,
        events: broadcast::Sender<WsEvent>,
        last_error: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            commands,
            status,
            cache,
            events,
            last_error,
        }
    }

    /// Open a session with the given credential.
    ///
    /// Idempotent: if a socket is already open or opening, this is a no-op
    /// instead of creating a second socket. The manager applies the same
    /// guard, so a stale status snapshot here cannot break the invariant.
    pub fn connect(&self, credential: Credential) {
        let status = self.status.borrow().clone();
        if status.is_connecting() || status.is_authenticated() {
            tracing::debug!(?status, "connect while a session is active, ignoring");
            return;
        }
        self.enqueue(Command::Connect(credential));
    }

    /// Close the session with a normal-closure code and cancel any pending
    /// reconnect. Terminal until `connect` is called again.
    pub fn disconnect(&self) {
        self.enqueue(Command::Disconnect);
    }

    /// Send a chat message. Fails synchronously when not authenticated;
    /// there is no outbound queueing across disconnects.
    pub fn send(&self, content: impl Into<String>) -> Result<(), SendError> {
        if !self.status.borrow().is_authenticated() {
            return Err(SendError::NotAuthenticated);
        }
        self.commands
            .send(Command::Send {
                content: content.into(),
            })
            .map_err(|_| SendError::Closed)
    }

    /// Send the legacy `get_portfolio` status probe. Same gate as `send`.
    pub fn request_portfolio(&self) -> Result<(), SendError> {
        if !self.status.borrow().is_authenticated() {
            return Err(SendError::NotAuthenticated);
        }
        self.commands
            .send(Command::RequestPortfolio)
            .map_err(|_| SendError::Closed)
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Watch receiver that yields every status transition, in order.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Ordered snapshot of every message this session has received.
    pub fn messages(&self) -> Vec<Message> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    /// Subscribe to message and status events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<WsEvent> {
        self.events.subscribe()
    }

    /// The most recent transport or handshake error, for display.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Empty the message cache. Only for explicit session reset (logout);
    /// reconnection never clears it.
    pub fn clear_messages(&self) {
        self.enqueue(Command::ClearMessages);
    }

    fn enqueue(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("session manager task is gone; command dropped");
        }
    }
}
