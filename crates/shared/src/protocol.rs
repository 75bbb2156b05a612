//! Wire protocol for the chatwire WebSocket session.
//!
//! Every frame is a JSON object with a `type` discriminator. Outbound frames
//! are a closed set; inbound frames are classified loosely because the
//! backend interleaves several frame kinds (`system`, `chat`, `typing`,
//! `tool`, ...) that all carry displayable `content`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// WebSocket close code for a normal closure. Suppresses reconnection.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code the backend uses when it revokes a session for policy or auth
/// reasons. Also suppresses reconnection.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Frames the client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake credential, sent exactly once per socket open.
    Auth {
        token: String,
        #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    /// A user-originated chat message.
    ChatMessage {
        content: String,
        #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    /// Legacy status probe; the backend answers on its own terms.
    GetPortfolio,
}

impl ClientFrame {
    /// Serialize to the JSON text the socket transmits.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames the client receives, after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Handshake accepted.
    AuthSuccess,
    /// Handshake rejected with a human-readable reason.
    AuthFailed { error: String },
    /// Any frame carrying displayable content.
    Chat {
        id: Option<String>,
        content: String,
        timestamp: Option<DateTime<Utc>>,
    },
    /// Well-formed but irrelevant to this core (acks, typing frames without
    /// content, etc.). Ignored.
    Other,
}

/// Loose view of an inbound frame used for classification.
#[derive(Debug, Deserialize)]
struct RawServerFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl ServerFrame {
    /// Classify one inbound text frame.
    ///
    /// Unknown frame types are not an error: if they carry `content` they
    /// are chat traffic, otherwise they are `Other` and the caller ignores
    /// them. Only JSON that fails to parse is malformed.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawServerFrame = serde_json::from_str(text)?;
        match raw.kind.as_deref() {
            Some("auth_success") => Ok(ServerFrame::AuthSuccess),
            Some("auth_failed") => Ok(ServerFrame::AuthFailed {
                error: raw
                    .error
                    .unwrap_or_else(|| "authentication rejected".to_string()),
            }),
            _ => match raw.content {
                Some(content) => Ok(ServerFrame::Chat {
                    id: raw.id,
                    content,
                    timestamp: raw.timestamp,
                }),
                None => Ok(ServerFrame::Other),
            },
        }
    }
}
