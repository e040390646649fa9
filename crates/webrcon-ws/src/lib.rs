//! webrcon-ws: RCON over a reconnecting WebSocket.
//!
//! # Features
//! - Auto-reconnect on abnormal close (exponential backoff, attempt ceiling)
//! - Request/response correlation over a shared identifier space
//! - Multi-response requests with a bounded reply window
//! - Keyed subscribers for general, player-related and echo broadcasts

pub mod client;
pub mod subscriptions;
pub mod transport;

pub use client::{RconClient, SubscriberCounts};
pub use subscriptions::{MessageHandler, Subscription, SubscriptionRegistry};
pub use transport::{
    Connector, NoopHandler, Socket, TransportHandler, TungsteniteConnector, WsTransport,
};
