//! Transport and client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::ReconnectConfig;

/// Configuration for the reconnecting transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// How long a connect attempt may wait for the socket to open.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_connect_timeout_ms() -> u64 { 5_000 }

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Configuration for the RCON client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    /// Timeout for a single-response request.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Default window for multi-response requests.
    #[serde(default = "default_stream_timeout_ms")]
    pub stream_timeout_ms: u64,
    /// Capacity of the connection event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_response_timeout_ms() -> u64 { 6_000 }
fn default_stream_timeout_ms() -> u64 { 5_000 }
fn default_event_capacity() -> usize { 64 }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            response_timeout_ms: default_response_timeout_ms(),
            stream_timeout_ms: default_stream_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl ClientConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }
}
