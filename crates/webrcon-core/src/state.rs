//! Connection lifecycle state and events.

use serde::{Deserialize, Serialize};

/// Where a transport is in its connect/reconnect lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket and nothing scheduled.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The socket is open.
    Connected,
    /// Waiting to run reconnect attempt `attempt` (1-based).
    Backoff { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Backoff { attempt } => write!(f, "backoff (attempt {attempt})"),
        }
    }
}

/// Lifecycle notifications published to the owner of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// The socket opened (initial connect or a successful reconnect).
    Opened,
    /// The socket closed on its own (not through an explicit disconnect).
    Closed { code: u16, reason: String },
    /// The reconnect ceiling was reached; the connection stays down.
    ReconnectExhausted { attempts: u32 },
}
