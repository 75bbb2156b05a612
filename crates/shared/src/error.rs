//! Shared error types.

/// Errors from encoding or classifying wire frames.
///
/// A malformed inbound frame is dropped by the receive path; it never closes
/// the connection or changes connection status.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
