//! Bearer credential handed to the session core for one handshake at a time.

use std::fmt;

/// Credential supplied by the external auth provider.
///
/// The session core holds this only for the lifetime of one session (it
/// redials with the last-known credential between reconnect attempts) and
/// never persists it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub user_id: Option<String>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

// Manual Debug so the token can never leak into logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}
