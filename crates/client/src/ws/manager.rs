//! The connection manager task.
//!
//! One tokio task exclusively owns the socket and the reconnect state.
//! Consumer commands and socket events funnel into the same `select!` loop,
//! so state transitions are applied in a single deterministic order with no
//! locking on connection state.
//!
//! Session lifecycle:
//!
//! ```text
//! Disconnected --connect()--> Connecting
//! Connecting --socket opened--> Connected --auth sent--> Authenticating
//! Authenticating --auth_success--> Authenticated
//! Authenticating --auth_failed / timeout--> Failed
//! Authenticated --unexpected close--> Connecting (retry) | Disconnected (exhausted)
//! any state --disconnect()--> Disconnected
//! ```

use std::sync::{Arc, RwLock};

use chatwire_shared::{
    ClientFrame, Message, Sender, ServerFrame, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION,
};
use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::auth::Credential;
use crate::config::ClientConfig;
use crate::stores::{MessageCache, SharedMessageCache};
use crate::ws::connection::{Command, ConnectionStatus, WsEvent, WsHandle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Capacity of the consumer event channel. A lagging consumer misses events
/// but can always recover from the cache snapshot.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Spawns and owns the session manager task.
pub struct WsManager;

impl WsManager {
    /// Start a manager task for the given configuration and return the
    /// handle consumers share. The task runs until every handle is dropped.
    pub fn spawn(config: ClientConfig) -> WsHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cache: SharedMessageCache = Arc::new(RwLock::new(MessageCache::new()));
        let last_error = Arc::new(RwLock::new(None));

        let task = ManagerTask {
            config,
            commands: command_rx,
            status: status_tx,
            events: event_tx.clone(),
            cache: cache.clone(),
            last_error: last_error.clone(),
            credential: None,
            attempt: 0,
        };
        tokio::spawn(task.run());

        WsHandle::new(command_tx, status_rx, cache, event_tx, last_error)
    }
}

/// How a live socket ended, from the session loop's point of view.
enum SocketEnd {
    /// `disconnect()` was called (or every handle was dropped).
    Manual,
    /// The handshake was rejected, timed out, or the server revoked the
    /// session. Never retried with the same credential.
    Rejected(String),
    /// The server closed with a normal-closure code. No retry.
    ServerClosed,
    /// Anything else: transport error, abrupt close, non-normal close code.
    /// Subject to the reconnect policy.
    Unexpected(String),
}

/// An inbound socket item after parsing.
enum Inbound {
    Frame(ServerFrame),
    /// Malformed or irrelevant (ping/pong/binary); dropped without touching
    /// connection state.
    Dropped,
    Closed(SocketEnd),
}

struct ManagerTask {
    config: ClientConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<WsEvent>,
    cache: SharedMessageCache,
    last_error: Arc<RwLock<Option<String>>>,
    credential: Option<Credential>,
    attempt: u32,
}

impl ManagerTask {
    async fn run(mut self) {
        // Idle loop: wait for connect. Each `run_session` call covers one
        // logical session including all of its reconnect attempts.
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Connect(credential) => {
                    self.credential = Some(credential);
                    self.attempt = 0;
                    self.run_session().await;
                }
                Command::Disconnect => {}
                Command::Send { .. } | Command::RequestPortfolio => {
                    tracing::warn!("dropping outbound frame while disconnected");
                }
                Command::ClearMessages => self.clear_cache(),
            }
        }
    }

    /// Dial, authenticate, and pump one session until it settles in
    /// Disconnected or Failed.
    async fn run_session(&mut self) {
        loop {
            let Some(credential) = self.credential.clone() else {
                self.set_status(ConnectionStatus::Disconnected);
                return;
            };

            self.set_status(ConnectionStatus::Connecting);
            let endpoint = self.config.endpoint.to_string();
            tracing::info!(%endpoint, "dialing");

            let dial = connect_async(endpoint);
            tokio::pin!(dial);
            let dial_result = loop {
                tokio::select! {
                    result = &mut dial => break Some(result),
                    command = self.commands.recv() => {
                        if !self.handle_offline_command(command) {
                            break None;
                        }
                    }
                }
            };
            let Some(dial_result) = dial_result else {
                self.set_status(ConnectionStatus::Disconnected);
                return;
            };

            let end = match dial_result {
                Ok((stream, _response)) => {
                    self.set_status(ConnectionStatus::Connected);
                    self.drive_socket(stream, &credential).await
                }
                Err(e) => SocketEnd::Unexpected(format!("dial failed: {e}")),
            };

            match end {
                SocketEnd::Manual => {
                    self.set_status(ConnectionStatus::Disconnected);
                    return;
                }
                SocketEnd::ServerClosed => {
                    tracing::info!("server closed the session normally");
                    self.set_status(ConnectionStatus::Disconnected);
                    return;
                }
                SocketEnd::Rejected(reason) => {
                    self.record_error(&reason);
                    self.set_status(ConnectionStatus::Failed { reason });
                    return;
                }
                SocketEnd::Unexpected(reason) => {
                    self.record_error(&reason);
                    if !self.backoff_before_retry().await {
                        self.set_status(ConnectionStatus::Disconnected);
                        return;
                    }
                }
            }
        }
    }

    /// Apply the reconnect policy after an unexpected close.
    ///
    /// Returns true when the retry delay elapsed and the session should
    /// redial, false when attempts are exhausted or `disconnect()` cancelled
    /// the pending timer. `max_attempts == 0` means retry forever.
    async fn backoff_before_retry(&mut self) -> bool {
        let policy = &self.config.reconnect;
        if policy.max_attempts > 0 && self.attempt >= policy.max_attempts {
            tracing::warn!(
                attempts = self.attempt,
                "reconnect attempts exhausted, giving up"
            );
            return false;
        }

        let delay = policy.delay_for_attempt(self.attempt);
        self.attempt += 1;
        self.set_status(ConnectionStatus::Connecting);
        tracing::info!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting after unexpected close"
        );

        let timer = tokio::time::sleep(delay);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = &mut timer => return true,
                command = self.commands.recv() => {
                    if !self.handle_offline_command(command) {
                        return false;
                    }
                }
            }
        }
    }

    /// Open one socket: handshake, then pump frames until it ends.
    async fn drive_socket(&mut self, stream: WsStream, credential: &Credential) -> SocketEnd {
        let (mut sink, mut source) = stream.split();

        let auth = ClientFrame::Auth {
            token: credential.token.clone(),
            user_id: credential.user_id.clone(),
        };
        let text = match auth.encode() {
            Ok(text) => text,
            Err(e) => return SocketEnd::Unexpected(format!("failed to encode auth frame: {e}")),
        };
        if let Err(e) = sink.send(WsMessage::text(text)).await {
            return SocketEnd::Unexpected(format!("handshake send failed: {e}"));
        }
        self.set_status(ConnectionStatus::Authenticating);
        tracing::info!("handshake sent, awaiting reply");

        // Handshake phase. The backend may interleave ordinary traffic
        // before confirming auth; such messages are buffered and delivered
        // only once authentication resolves.
        let mut pending: Vec<Message> = Vec::new();
        let deadline = tokio::time::sleep(self.config.handshake_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    let _ = close_normally(&mut sink).await;
                    return SocketEnd::Rejected("handshake timed out".to_string());
                }
                incoming = source.next() => match classify(incoming) {
                    Inbound::Frame(ServerFrame::AuthSuccess) => {
                        for message in pending.drain(..) {
                            self.deliver(message);
                        }
                        self.attempt = 0;
                        self.clear_error();
                        self.set_status(ConnectionStatus::Authenticated);
                        tracing::info!("authenticated");
                        break;
                    }
                    Inbound::Frame(ServerFrame::AuthFailed { error }) => {
                        tracing::warn!(reason = %error, "handshake rejected");
                        let _ = close_normally(&mut sink).await;
                        return SocketEnd::Rejected(error);
                    }
                    Inbound::Frame(ServerFrame::Chat { id, content, timestamp }) => {
                        pending.push(to_message(id, content, timestamp));
                    }
                    Inbound::Frame(ServerFrame::Other) | Inbound::Dropped => {}
                    Inbound::Closed(end) => return end,
                },
                command = self.commands.recv() => {
                    if !self.handle_offline_command(command) {
                        let _ = close_normally(&mut sink).await;
                        return SocketEnd::Manual;
                    }
                }
            }
        }

        // Authenticated phase.
        loop {
            tokio::select! {
                incoming = source.next() => match classify(incoming) {
                    Inbound::Frame(ServerFrame::Chat { id, content, timestamp }) => {
                        self.deliver(to_message(id, content, timestamp));
                    }
                    Inbound::Frame(ServerFrame::AuthFailed { error }) => {
                        // Mid-session revocation by the server.
                        tracing::warn!(reason = %error, "session revoked");
                        let _ = close_normally(&mut sink).await;
                        return SocketEnd::Rejected(error);
                    }
                    Inbound::Frame(_) | Inbound::Dropped => {}
                    Inbound::Closed(end) => return end,
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send { content }) => {
                        let frame = ClientFrame::ChatMessage {
                            content,
                            user_id: credential.user_id.clone(),
                        };
                        if let Some(end) = transmit(&mut sink, frame).await {
                            return end;
                        }
                    }
                    Some(Command::RequestPortfolio) => {
                        if let Some(end) = transmit(&mut sink, ClientFrame::GetPortfolio).await {
                            return end;
                        }
                    }
                    Some(Command::Connect(_)) => {
                        tracing::debug!("connect while already connected, ignoring");
                    }
                    Some(Command::ClearMessages) => self.clear_cache(),
                    Some(Command::Disconnect) | None => {
                        let _ = close_normally(&mut sink).await;
                        return SocketEnd::Manual;
                    }
                },
            }
        }
    }

    /// Command handling shared by the phases where nothing can be sent yet
    /// (dialing, backoff, handshake). Returns false on disconnect or when
    /// every handle is gone.
    fn handle_offline_command(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Connect(_)) => {
                tracing::debug!("connect while already connecting, ignoring");
                true
            }
            Some(Command::Send { .. }) | Some(Command::RequestPortfolio) => {
                tracing::warn!("dropping outbound frame while not authenticated");
                true
            }
            Some(Command::ClearMessages) => {
                self.clear_cache();
                true
            }
            Some(Command::Disconnect) | None => false,
        }
    }

    /// Append to the cache, then notify. Duplicate ids are dropped by the
    /// cache and produce no event.
    fn deliver(&self, message: Message) {
        let appended = self
            .cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .append(message.clone());
        if appended {
            let _ = self.events.send(WsEvent::Message(message));
        } else {
            tracing::debug!(id = %message.id, "duplicate message id, ignored");
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        if *self.status.borrow() == status {
            return;
        }
        tracing::debug!(?status, "status change");
        self.status.send_replace(status.clone());
        let _ = self.events.send(WsEvent::StatusChanged(status));
    }

    fn record_error(&self, reason: &str) {
        tracing::warn!(reason, "connection error");
        *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = Some(reason.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn clear_cache(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Turn one socket item into an [`Inbound`] decision.
fn classify(incoming: Option<Result<WsMessage, WsError>>) -> Inbound {
    match incoming {
        Some(Ok(WsMessage::Text(text))) => match ServerFrame::parse(text.as_str()) {
            Ok(frame) => Inbound::Frame(frame),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                Inbound::Dropped
            }
        },
        Some(Ok(WsMessage::Close(frame))) => Inbound::Closed(close_end(frame)),
        // Binary frames are not part of the protocol; ping/pong are handled
        // by tungstenite.
        Some(Ok(_)) => Inbound::Dropped,
        Some(Err(e)) => Inbound::Closed(SocketEnd::Unexpected(format!("socket error: {e}"))),
        None => Inbound::Closed(SocketEnd::Unexpected(
            "connection closed without a close frame".to_string(),
        )),
    }
}

/// Map a server close frame onto the reconnect policy's close-code contract:
/// 1000 is a clean end, 1008 is revocation, everything else is unexpected.
fn close_end(frame: Option<CloseFrame>) -> SocketEnd {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            if code == CLOSE_NORMAL {
                SocketEnd::ServerClosed
            } else if code == CLOSE_POLICY_VIOLATION {
                let reason = if frame.reason.is_empty() {
                    "session revoked by server".to_string()
                } else {
                    frame.reason.to_string()
                };
                SocketEnd::Rejected(reason)
            } else {
                SocketEnd::Unexpected(format!("closed with code {code}"))
            }
        }
        None => SocketEnd::Unexpected("closed without a close code".to_string()),
    }
}

async fn transmit(sink: &mut WsSink, frame: ClientFrame) -> Option<SocketEnd> {
    let text = match frame.encode() {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode outbound frame");
            return None;
        }
    };
    tracing::debug!(frame = %text, "sending");
    match sink.send(WsMessage::text(text)).await {
        Ok(()) => None,
        Err(e) => Some(SocketEnd::Unexpected(format!("send failed: {e}"))),
    }
}

async fn close_normally(sink: &mut WsSink) -> Result<(), WsError> {
    sink.send(WsMessage::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    })))
    .await
}

fn to_message(
    id: Option<String>,
    content: String,
    timestamp: Option<DateTime<Utc>>,
) -> Message {
    Message {
        id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        sender: Sender::Assistant,
        content,
        timestamp: timestamp.unwrap_or_else(Utc::now),
    }
}
