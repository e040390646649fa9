//! Server address → WebSocket URL.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RconError;

/// The values the client consumes from the surrounding server configuration.
///
/// The RCON password travels as the single path segment of the URL; that is
/// the only authentication the protocol has.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// `host:port` of the RCON listener.
    pub address: String,
    pub password: String,
    /// Use `wss://` instead of `ws://`.
    #[serde(default)]
    pub secure: bool,
}

impl ServerEndpoint {
    pub fn new(address: impl Into<String>, password: impl Into<String>, secure: bool) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            secure,
        }
    }

    /// Build the connection URL, percent-encoding the password.
    pub fn url(&self) -> Result<String, RconError> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(RconError::InvalidEndpoint("address is empty".into()));
        }
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{address}/"))
            .map_err(|e| RconError::InvalidEndpoint(format!("{address}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RconError::InvalidEndpoint(format!("{address}: cannot carry a path")))?
            .pop_if_empty()
            .push(&self.password);
        Ok(url.to_string())
    }
}

impl std::fmt::Debug for ServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerEndpoint")
            .field("address", &self.address)
            .field("password", &"<redacted>")
            .field("secure", &self.secure)
            .finish()
    }
}
