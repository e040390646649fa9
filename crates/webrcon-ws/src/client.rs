//! RCON protocol client multiplexed over one reconnecting WebSocket.
//!
//! Three traffic shapes share the socket and a single `i32` identifier space:
//!
//! - request/response: a fresh identifier, one reply, 6 s timeout
//! - request/stream: a fresh identifier, any number of replies until expiry
//! - fire-and-forget: the fixed echo identifier, echoes go to subscribers
//!
//! Unsolicited server broadcasts arrive on the reserved identifiers and are
//! fanned out to keyed subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;

use webrcon_core::config::ClientConfig;
use webrcon_core::endpoint::ServerEndpoint;
use webrcon_core::error::RconError;
use webrcon_core::message::{
    CommandRequest, CommandResponse, MSG_ID_ECHO, MSG_ID_GENERAL, MSG_ID_PLAYER_RELATED,
};
use webrcon_core::sequence::MessageIdSequence;
use webrcon_core::state::{ConnectionEvent, ConnectionState};

use crate::subscriptions::{MessageHandler, Subscription, SubscriptionRegistry};
use crate::transport::{Connector, TransportHandler, TungsteniteConnector, WsTransport};

struct StreamEntry {
    callback: MessageHandler,
    expiry: JoinHandle<()>,
}

#[derive(Default)]
struct Correlation {
    pending: HashMap<i32, oneshot::Sender<CommandResponse>>,
    streams: HashMap<i32, StreamEntry>,
}

/// Which branch an inbound frame was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Reply,
    Stream,
    General,
    PlayerRelated,
    Command,
    Unrecognized,
    Malformed,
}

/// Receives transport events and routes inbound frames.
struct Dispatcher {
    correlation: Mutex<Correlation>,
    general: SubscriptionRegistry,
    player_related: SubscriptionRegistry,
    command: SubscriptionRegistry,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Dispatcher {
    fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            correlation: Mutex::new(Correlation::default()),
            general: SubscriptionRegistry::new(),
            player_related: SubscriptionRegistry::new(),
            command: SubscriptionRegistry::new(),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Correlation> {
        self.correlation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, raw: &str) -> Route {
        let msg = match CommandResponse::from_frame(raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse message");
                return Route::Malformed;
            }
        };
        let id = msg.identifier;

        let (reply_tx, stream_cb) = {
            let mut c = self.lock();
            let reply_tx = c.pending.remove(&id);
            let stream_cb = if reply_tx.is_some() {
                None
            } else {
                c.streams.get(&id).map(|e| Arc::clone(&e.callback))
            };
            (reply_tx, stream_cb)
        };

        if let Some(tx) = reply_tx {
            if tx.send(msg).is_err() {
                tracing::debug!(id, "reply arrived after the requester went away");
            }
            return Route::Reply;
        }
        if let Some(callback) = stream_cb {
            callback(&msg);
            return Route::Stream;
        }

        match id {
            MSG_ID_GENERAL => {
                self.general.dispatch(&msg);
                Route::General
            }
            MSG_ID_PLAYER_RELATED => {
                self.player_related.dispatch(&msg);
                Route::PlayerRelated
            }
            MSG_ID_ECHO => {
                self.command.dispatch(&msg);
                Route::Command
            }
            _ => {
                tracing::debug!(id, kind = %msg.kind, message = %msg.message, "unknown message");
                Route::Unrecognized
            }
        }
    }

    fn expire_stream(&self, id: i32) {
        if self.lock().streams.remove(&id).is_some() {
            tracing::trace!(id, "multi-response window closed");
        }
    }

    fn clear(&self) {
        let streams: Vec<StreamEntry> = {
            let mut c = self.lock();
            // Dropping the senders fails every waiting request with `Disconnected`.
            c.pending.clear();
            c.streams.drain().map(|(_, e)| e).collect()
        };
        for entry in streams {
            entry.expiry.abort();
        }
        self.general.clear();
        self.player_related.clear();
        self.command.clear();
    }
}

impl TransportHandler for Dispatcher {
    fn on_open(&self) {
        let _ = self.events.send(ConnectionEvent::Opened);
    }

    fn on_message(&self, raw: &str) {
        self.route(raw);
    }

    fn on_error(&self, error: &RconError) {
        tracing::debug!(error = %error, "transport error");
    }

    fn on_close(&self, code: u16, reason: &str) {
        let _ = self.events.send(ConnectionEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    fn on_reconnect_exhausted(&self, attempts: u32) {
        let _ = self.events.send(ConnectionEvent::ReconnectExhausted { attempts });
    }
}

/// Removes a single-response registration when the request finishes,
/// whichever way it finishes.
struct PendingGuard<'a> {
    dispatcher: &'a Dispatcher,
    id: i32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.lock().pending.remove(&self.id);
    }
}

/// Subscriber counts per broadcast channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberCounts {
    pub general: usize,
    pub player_related: usize,
    pub command: usize,
}

/// RCON client for one server session.
///
/// Create one per session; after [`disconnect`](Self::disconnect) build a new
/// client rather than reconnecting this one. Dropping the client disconnects.
pub struct RconClient {
    transport: WsTransport,
    dispatcher: Arc<Dispatcher>,
    ids: Mutex<MessageIdSequence>,
    config: ClientConfig,
}

impl RconClient {
    /// Client for `endpoint` using tungstenite.
    pub fn new(endpoint: &ServerEndpoint, config: ClientConfig) -> Result<Self, RconError> {
        Ok(Self::with_url(endpoint.url()?, config))
    }

    pub fn with_url(url: impl Into<String>, config: ClientConfig) -> Self {
        Self::with_connector(url, config, Arc::new(TungsteniteConnector))
    }

    pub fn with_connector(
        url: impl Into<String>,
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.event_capacity));
        let handler: Arc<dyn TransportHandler> = dispatcher.clone();
        let transport = WsTransport::with_parts(url, config.transport.clone(), connector, handler);
        Self {
            transport,
            dispatcher,
            ids: Mutex::new(MessageIdSequence::new()),
            config,
        }
    }

    pub fn transport(&self) -> &WsTransport {
        &self.transport
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// See [`WsTransport::connect`].
    pub async fn connect(&self) -> Result<(), RconError> {
        self.transport.connect().await
    }

    /// Disconnect the transport, then drop every pending request, stream and
    /// subscription.
    pub fn disconnect(&self) {
        self.transport.disconnect();
        self.dispatcher.clear();
    }

    /// Send a raw text frame.
    pub fn send(&self, payload: impl Into<String>) -> bool {
        self.transport.send(payload)
    }

    /// Lifecycle events: opens, unsolicited closes, reconnect exhaustion.
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.dispatcher.events.subscribe()
    }

    fn take_next_id(&self) -> i32 {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take_next()
    }

    /// Send `command` and wait for the reply carrying its identifier.
    pub async fn send_command_get_response(
        &self,
        command: &str,
    ) -> Result<CommandResponse, RconError> {
        let id = self.take_next_id();
        let frame = CommandRequest::new(command, id).to_frame()?;

        let (tx, rx) = oneshot::channel();
        self.dispatcher.lock().pending.insert(id, tx);
        let _guard = PendingGuard {
            dispatcher: &self.dispatcher,
            id,
        };

        tracing::debug!(id, command, "sendCommandGetResponse");
        if !self.transport.send(frame) {
            return Err(RconError::SendFailed);
        }

        let timeout = self.config.response_timeout();
        match time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RconError::Disconnected),
            Err(_) => Err(RconError::ResponseTimeout {
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Send `command` and invoke `callback` for every reply that carries its
    /// identifier until `timeout` elapses. Expiry is silent.
    ///
    /// Returns whether the frame was handed to the socket.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime; the expiry timer is a
    /// spawned task.
    pub fn send_command_get_responses_many<F>(
        &self,
        command: &str,
        callback: F,
        timeout: Duration,
    ) -> bool
    where
        F: Fn(&CommandResponse) + Send + Sync + 'static,
    {
        let id = self.take_next_id();
        let frame = match CommandRequest::new(command, id).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode command");
                return false;
            }
        };

        {
            let mut c = self.dispatcher.lock();
            let expiry = tokio::spawn(expire_after(Arc::downgrade(&self.dispatcher), id, timeout));
            c.streams.insert(
                id,
                StreamEntry {
                    callback: Arc::new(callback),
                    expiry,
                },
            );
        }

        let sent = self.transport.send(frame);
        if !sent {
            tracing::warn!(id, command, "multi-response command was not sent");
        }
        sent
    }

    /// [`send_command_get_responses_many`](Self::send_command_get_responses_many)
    /// with the configured default window (5 s).
    ///
    /// # Panics
    ///
    /// Outside a Tokio runtime, like the method it wraps.
    pub fn send_command_get_responses_many_default<F>(&self, command: &str, callback: F) -> bool
    where
        F: Fn(&CommandResponse) + Send + Sync + 'static,
    {
        self.send_command_get_responses_many(command, callback, self.config.stream_timeout())
    }

    /// Channel form of a multi-response request. The receiver yields every
    /// reply and ends when the window closes or the client disconnects.
    ///
    /// # Panics
    ///
    /// Outside a Tokio runtime, like
    /// [`send_command_get_responses_many`](Self::send_command_get_responses_many).
    pub fn stream_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> mpsc::UnboundedReceiver<CommandResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send_command_get_responses_many(
            command,
            move |msg| {
                let _ = tx.send(msg.clone());
            },
            timeout,
        );
        rx
    }

    /// Fire-and-forget `command` on the echo identifier.
    pub fn send_command(&self, command: &str) -> bool {
        match CommandRequest::new(command, MSG_ID_ECHO).to_frame() {
            Ok(frame) => self.transport.send(frame),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode command");
                false
            }
        }
    }

    /// Subscribe to general broadcasts (identifier `0`).
    pub fn subscribe_on_message_general<F>(&self, key: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&CommandResponse) + Send + Sync + 'static,
    {
        self.dispatcher.general.register(key, handler)
    }

    /// Subscribe to player-related broadcasts (identifier `-1`).
    pub fn subscribe_on_message_player_related<F>(
        &self,
        key: impl Into<String>,
        handler: F,
    ) -> Subscription
    where
        F: Fn(&CommandResponse) + Send + Sync + 'static,
    {
        self.dispatcher.player_related.register(key, handler)
    }

    /// Subscribe to echoes of fire-and-forget commands.
    pub fn subscribe_on_message_command<F>(&self, key: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&CommandResponse) + Send + Sync + 'static,
    {
        self.dispatcher.command.register(key, handler)
    }

    /// Single-response requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.dispatcher.lock().pending.len()
    }

    /// Multi-response requests still inside their window.
    pub fn pending_streams(&self) -> usize {
        self.dispatcher.lock().streams.len()
    }

    pub fn subscriber_counts(&self) -> SubscriberCounts {
        SubscriberCounts {
            general: self.dispatcher.general.len(),
            player_related: self.dispatcher.player_related.len(),
            command: self.dispatcher.command.len(),
        }
    }
}

impl Drop for RconClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for RconClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconClient")
            .field("url", &"<redacted>")
            .field("state", &self.state())
            .field("pending_requests", &self.pending_requests())
            .field("pending_streams", &self.pending_streams())
            .finish()
    }
}

async fn expire_after(dispatcher: Weak<Dispatcher>, id: i32, timeout: Duration) {
    time::sleep(timeout).await;
    if let Some(dispatcher) = dispatcher.upgrade() {
        dispatcher.expire_stream(id);
    }
}
