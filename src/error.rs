//! Closed error taxonomy for the chat sync core.
//!
//! DESIGN
//! ======
//! Every failure lands in one of four families so callers can match
//! exhaustively:
//! - `Connectivity`: transport down, connect refused, REST unreachable.
//! - `Validation`: rejected locally before any network call.
//! - `RemoteRejection`: the server answered with an `error` event or a
//!   non-success HTTP status.
//! - `Parse`: a payload could not be decoded.
//!
//! Connectivity and remote errors are recovered locally (logged, state flag
//! set). Only `Parse` is expected to reach a top-level handler.

/// Grepable error code and retryable flag, mirrored into UI state and logs.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectivityError {
    /// An action needed a live connection and there was none.
    #[error("not connected")]
    NotConnected,
    /// The transport handshake failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// The server did not confirm the session in time.
    #[error("timed out waiting for server")]
    Timeout,
    /// The transport closed underneath an operation.
    #[error("connection closed")]
    Closed,
    /// A REST call could not reach the server.
    #[error("http request failed: {0}")]
    Http(String),
}

/// Local input validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing user id")]
    MissingUserId,
    #[error("missing room id")]
    MissingRoomId,
    #[error("missing message id")]
    MissingMessageId,
    /// Neither text nor media was supplied.
    #[error("message is empty")]
    EmptyMessage,
    #[error("edited content is empty")]
    EmptyEdit,
    /// A media reference still points at the local device.
    #[error("media reference is not a durable url: {0}")]
    LocalMedia(String),
}

/// Error type for every fallible chat sync operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The server refused an operation.
    #[error("server rejected {event}: {message}")]
    RemoteRejection {
        event: String,
        message: String,
        code: Option<String>,
    },
    /// A payload could not be decoded.
    #[error("malformed payload: {0}")]
    Parse(String),
}

impl SyncError {
    /// Shorthand for the most common connectivity failure.
    #[must_use]
    pub fn not_connected() -> Self {
        Self::Connectivity(ConnectivityError::NotConnected)
    }

    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Connectivity(ConnectivityError::NotConnected) => "E_NOT_CONNECTED",
            Self::Connectivity(ConnectivityError::ConnectFailed(_)) => "E_CONNECT_FAILED",
            Self::Connectivity(ConnectivityError::Timeout) => "E_TIMEOUT",
            Self::Connectivity(ConnectivityError::Closed) => "E_CLOSED",
            Self::Connectivity(ConnectivityError::Http(_)) => "E_HTTP",
            Self::Validation(ValidationError::MissingUserId) => "E_MISSING_USER_ID",
            Self::Validation(ValidationError::MissingRoomId) => "E_MISSING_ROOM_ID",
            Self::Validation(ValidationError::MissingMessageId) => "E_MISSING_MESSAGE_ID",
            Self::Validation(ValidationError::EmptyMessage) => "E_EMPTY_MESSAGE",
            Self::Validation(ValidationError::EmptyEdit) => "E_EMPTY_EDIT",
            Self::Validation(ValidationError::LocalMedia(_)) => "E_LOCAL_MEDIA",
            Self::RemoteRejection { .. } => "E_REMOTE_REJECTION",
            Self::Parse(_) => "E_PARSE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(
                ConnectivityError::ConnectFailed(_)
                    | ConnectivityError::Timeout
                    | ConnectivityError::Closed
                    | ConnectivityError::Http(_)
            )
        )
    }
}

impl From<frames::CodecError> for SyncError {
    fn from(err: frames::CodecError) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Parse(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::RemoteRejection {
                event: "http".to_owned(),
                message: format!("HTTP {}", status.as_u16()),
                code: None,
            };
        }
        Self::Connectivity(ConnectivityError::Http(err.to_string()))
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
