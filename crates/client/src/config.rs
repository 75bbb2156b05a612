//! Client configuration: endpoint, reconnect policy, handshake timeout.
//!
//! Everything here is externally supplied. Library callers build a
//! [`ClientConfig`] directly; the console binary reads one from `CHATWIRE_*`
//! environment variables.

use std::time::Duration;

use url::Url;

/// Configuration for auto-reconnect behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts before settling disconnected.
    pub max_attempts: u32,
    /// Initial delay in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on the computed delay in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_factor: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (zero-based): `base * factor^attempt`,
    /// capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_ms as f32 * self.backoff_factor.powi(attempt as i32);
        Duration::from_millis((delay as u64).min(self.max_delay_ms))
    }
}

/// Full configuration surface consumed by the session core.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8000/api/ws`.
    pub endpoint: Url,
    pub reconnect: ReconnectConfig,
    /// How long to wait for an `auth_success`/`auth_failed` reply before the
    /// handshake is treated as rejected.
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(endpoint.as_ref())
            .map_err(|e| ConfigError::InvalidEndpoint(e.to_string()))?;
        match endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ConfigError::InvalidEndpoint(format!(
                    "expected ws:// or wss:// endpoint, got {other}://"
                )))
            }
        }
        Ok(Self {
            endpoint,
            reconnect: ReconnectConfig::default(),
            handshake_timeout: Duration::from_secs(10),
        })
    }

    /// Read configuration from environment variables.
    ///
    /// - `CHATWIRE_ENDPOINT`: WebSocket URL (default `ws://127.0.0.1:8000/api/ws`)
    /// - `CHATWIRE_RECONNECT_MAX_ATTEMPTS` (default 10)
    /// - `CHATWIRE_RECONNECT_BASE_DELAY_MS` (default 1000)
    /// - `CHATWIRE_RECONNECT_MAX_DELAY_MS` (default 30000)
    /// - `CHATWIRE_RECONNECT_BACKOFF_FACTOR` (default 1.5)
    /// - `CHATWIRE_HANDSHAKE_TIMEOUT_MS` (default 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = std::env::var("CHATWIRE_ENDPOINT")
            .unwrap_or_else(|_| "ws://127.0.0.1:8000/api/ws".to_string());
        let mut config = Self::new(endpoint)?;

        if let Some(v) = env_parse("CHATWIRE_RECONNECT_MAX_ATTEMPTS")? {
            config.reconnect.max_attempts = v;
        }
        if let Some(v) = env_parse("CHATWIRE_RECONNECT_BASE_DELAY_MS")? {
            config.reconnect.base_delay_ms = v;
        }
        if let Some(v) = env_parse("CHATWIRE_RECONNECT_MAX_DELAY_MS")? {
            config.reconnect.max_delay_ms = v;
        }
        if let Some(v) = env_parse::<f32>("CHATWIRE_RECONNECT_BACKOFF_FACTOR")? {
            config.reconnect.backoff_factor = v;
        }
        if let Some(v) = env_parse("CHATWIRE_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout = Duration::from_millis(v);
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}
