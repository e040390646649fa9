//! webrcon-core: wire types and connection policy for webrcon.
//!
//! # Overview
//!
//! webrcon talks to a game server's WebSocket RCON endpoint. This crate holds
//! everything that does not touch a socket:
//!
//! - [`CommandRequest`] / [`CommandResponse`]: wire frames
//! - [`MessageIdSequence`]: request identifier allocation that avoids the
//!   reserved broadcast identifiers
//! - [`ReconnectPolicy`]: backoff schedule for automatic reconnects
//! - [`RconError`]: structured error type
//! - [`ServerEndpoint`], [`ClientConfig`], [`TransportConfig`]: inputs

pub mod config;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod policy;
pub mod sequence;
pub mod state;

pub use config::{ClientConfig, TransportConfig};
pub use endpoint::ServerEndpoint;
pub use error::RconError;
pub use message::{
    CommandRequest, CommandResponse, LogType, MSG_ID_ECHO, MSG_ID_GENERAL,
    MSG_ID_PLAYER_RELATED, MSG_ID_SAFE_START,
};
pub use policy::{ReconnectConfig, ReconnectPolicy};
pub use sequence::MessageIdSequence;
pub use state::{ConnectionEvent, ConnectionState};
