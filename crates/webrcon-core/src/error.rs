//! Connection and protocol error types.

use thiserror::Error;

/// Errors surfaced to callers of the transport and the RCON client.
///
/// Values are `Clone` because a single in-flight connect attempt is shared by
/// every caller awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RconError {
    /// The socket did not report open within the connect timeout.
    #[error("Timed out connecting to websocket after {ms}ms")]
    ConnectTimeout { ms: u64 },

    /// The socket failed before it ever opened.
    #[error("WebSocket connect error: {0}")]
    Connect(String),

    /// The open socket failed while sending or receiving.
    #[error("WebSocket error: {0}")]
    Socket(String),

    /// The frame could not be handed to the socket (not connected, or the
    /// socket writer is gone).
    #[error("Failed to send message")]
    SendFailed,

    /// No reply carrying the request's identifier arrived in time.
    #[error("Timed out waiting for response after {ms}ms")]
    ResponseTimeout { ms: u64 },

    /// The connection was torn down by an explicit disconnect while the
    /// operation was pending.
    #[error("Connection was disconnected")]
    Disconnected,

    /// The server address/password could not be turned into a WebSocket URL.
    #[error("Invalid server endpoint: {0}")]
    InvalidEndpoint(String),

    /// An outbound frame could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RconError {
    /// Returns `true` if retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::Connect(_)
                | Self::Socket(_)
                | Self::SendFailed
                | Self::ResponseTimeout { .. }
        )
    }

    /// Returns `true` for either of the timeout variants.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. } | Self::ResponseTimeout { .. })
    }
}

impl From<serde_json::Error> for RconError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
