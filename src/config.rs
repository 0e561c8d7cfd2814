//! Client configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:3000/ws";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api";
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_TYPING_IDLE_MS: u64 = 2000;
pub const DEFAULT_REMOTE_TYPING_EXPIRY_MS: u64 = 6000;
pub const DEFAULT_ECHO_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_RECONNECT_INITIAL_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
    #[error("{var} must be true or false, got '{value}'")]
    InvalidBool { var: &'static str, value: String },
}

/// Reconnection behavior of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial: Duration,
    pub max: Duration,
    /// Re-join previously joined rooms once the link is back.
    pub auto_rejoin: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_MS),
            max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            auto_rejoin: true,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based), without jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(16));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub ws_url: String,
    pub api_url: String,
    pub page_size: usize,
    pub typing_idle: Duration,
    pub remote_typing_expiry: Duration,
    pub echo_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_owned(),
            api_url: DEFAULT_API_URL.to_owned(),
            page_size: DEFAULT_PAGE_SIZE,
            typing_idle: Duration::from_millis(DEFAULT_TYPING_IDLE_MS),
            remote_typing_expiry: Duration::from_millis(DEFAULT_REMOTE_TYPING_EXPIRY_MS),
            echo_timeout: Duration::from_millis(DEFAULT_ECHO_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Build typed config from environment variables.
    ///
    /// All optional:
    /// - `CHAT_WS_URL`, `CHAT_API_URL`
    /// - `CHAT_PAGE_SIZE`: default 10, must be > 0
    /// - `CHAT_TYPING_IDLE_MS`: default 2000
    /// - `CHAT_REMOTE_TYPING_EXPIRY_MS`: default 6000
    /// - `CHAT_ECHO_TIMEOUT_MS`: default 10000
    /// - `CHAT_CONNECT_TIMEOUT_MS`: default 5000
    /// - `CHAT_RECONNECT`, `CHAT_AUTO_REJOIN`: `true` (default) or `false`
    /// - `CHAT_RECONNECT_INITIAL_MS` / `CHAT_RECONNECT_MAX_MS`: 1000 / 10000
    ///
    /// # Errors
    ///
    /// Returns an error for a zero page size or a malformed boolean.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. `from_env` delegates here.
    ///
    /// # Errors
    ///
    /// Same as [`SyncConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parse_ms = |key: &str, default: u64| {
            Duration::from_millis(parse_or(lookup(key).as_deref(), default))
        };

        let page_size = parse_or(lookup("CHAT_PAGE_SIZE").as_deref(), DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(ConfigError::Zero { var: "CHAT_PAGE_SIZE" });
        }

        let reconnect = ReconnectPolicy {
            enabled: parse_bool("CHAT_RECONNECT", lookup("CHAT_RECONNECT").as_deref(), true)?,
            initial: parse_ms("CHAT_RECONNECT_INITIAL_MS", DEFAULT_RECONNECT_INITIAL_MS),
            max: parse_ms("CHAT_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS),
            auto_rejoin: parse_bool("CHAT_AUTO_REJOIN", lookup("CHAT_AUTO_REJOIN").as_deref(), true)?,
        };

        Ok(Self {
            ws_url: lookup("CHAT_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_owned()),
            api_url: lookup("CHAT_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            page_size,
            typing_idle: parse_ms("CHAT_TYPING_IDLE_MS", DEFAULT_TYPING_IDLE_MS),
            remote_typing_expiry: parse_ms("CHAT_REMOTE_TYPING_EXPIRY_MS", DEFAULT_REMOTE_TYPING_EXPIRY_MS),
            echo_timeout: parse_ms("CHAT_ECHO_TIMEOUT_MS", DEFAULT_ECHO_TIMEOUT_MS),
            connect_timeout: parse_ms("CHAT_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS),
            reconnect,
        })
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}

fn parse_bool(var: &'static str, raw: Option<&str>, default: bool) -> Result<bool, ConfigError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some("true" | "1") => Ok(true),
        Some("false" | "0") => Ok(false),
        Some(other) => Err(ConfigError::InvalidBool { var, value: other.to_owned() }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
