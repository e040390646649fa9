//! RCON wire types and reserved identifiers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Identifier the server uses for general, unsolicited broadcasts.
pub const MSG_ID_GENERAL: i32 = 0;

/// Identifier the server uses for player-related broadcasts (chat, reports).
pub const MSG_ID_PLAYER_RELATED: i32 = -1;

/// Identifier attached to fire-and-forget commands. Server echoes of those
/// commands come back with the same identifier.
pub const MSG_ID_ECHO: i32 = -698;

/// First identifier handed out after the sequence skips the reserved range.
pub const MSG_ID_SAFE_START: i32 = 1699;

/// The kind of an inbound frame, as reported in its `Type` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogType {
    #[default]
    Generic,
    Error,
    Warning,
    Chat,
    Report,
    ClientPerf,
    Subscription,
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Chat => write!(f, "chat"),
            Self::Report => write!(f, "report"),
            Self::ClientPerf => write!(f, "client-performance"),
            Self::Subscription => write!(f, "subscription-echo"),
        }
    }
}

/// Client → server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandRequest {
    pub message: String,
    pub identifier: i32,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, identifier: i32) -> Self {
        Self {
            message: command.into(),
            identifier,
        }
    }

    /// Encode as the JSON text frame the server expects.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandResponse {
    pub message: String,
    pub identifier: i32,
    #[serde(rename = "Type", default, deserialize_with = "null_as_default")]
    pub kind: LogType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stacktrace: String,
}

impl CommandResponse {
    /// Decode an inbound text frame.
    pub fn from_frame(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Chat, report and RPC replies carry a JSON document inside `Message`.
    pub fn message_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.message)
    }

    /// Returns `true` if this frame arrived on one of the reserved
    /// broadcast/echo identifiers.
    pub fn is_broadcast(&self) -> bool {
        is_reserved(self.identifier)
    }
}

/// Returns `true` for the three identifiers used for server-side routing.
pub fn is_reserved(identifier: i32) -> bool {
    matches!(
        identifier,
        MSG_ID_GENERAL | MSG_ID_PLAYER_RELATED | MSG_ID_ECHO
    )
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
