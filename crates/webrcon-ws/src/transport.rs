//! Reconnecting WebSocket transport.
//!
//! [`WsTransport`] owns at most one socket at a time. A spawned socket task
//! reads frames in order and hands text frames to the [`TransportHandler`];
//! outbound frames reach it over an unbounded channel so [`WsTransport::send`]
//! never blocks.
//!
//! Lifecycle:
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open──▶ Connected
//!      ▲                          │                    │
//!      │                        error               close ≠ 1000
//!      │                          ▼                    ▼
//!      └──── ceiling reached ─ Backoff(n) ◀────────────┘
//! ```
//! `disconnect()` moves any state straight to `Disconnected` and disables
//! reconnection. Each socket carries a generation number so that events from
//! a socket that has since been replaced or torn down are ignored.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use webrcon_core::config::TransportConfig;
use webrcon_core::error::RconError;
use webrcon_core::policy::ReconnectPolicy;
use webrcon_core::state::ConnectionState;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close frame carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Socket went away without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

pub type WsError = tokio_tungstenite::tungstenite::Error;
pub type SocketSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
pub type SocketStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Both halves of an open WebSocket.
pub struct Socket {
    pub sink: SocketSink,
    pub stream: SocketStream,
}

/// Opens sockets. The default is [`TungsteniteConnector`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a socket to `url`, returning once it is ready for frames.
    async fn connect(&self, url: &str) -> Result<Socket, RconError>;
}

/// Connector backed by `tokio_tungstenite::connect_async` (`ws://` and
/// `wss://` via rustls).
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Socket, RconError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| RconError::Connect(e.to_string()))?;
        let (sink, stream) = ws.split();
        Ok(Socket {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Hook points invoked by the transport. Every method defaults to a no-op so
/// the transport is usable on its own.
///
/// Hooks run on transport tasks without internal locks held; they may call
/// back into the transport.
pub trait TransportHandler: Send + Sync + 'static {
    fn on_open(&self) {}

    /// A text frame arrived. Frames are delivered one at a time, in order.
    fn on_message(&self, _raw: &str) {}

    fn on_error(&self, _error: &RconError) {}

    /// The socket closed on its own. Not invoked for explicit disconnects.
    fn on_close(&self, _code: u16, _reason: &str) {}

    /// Reconnection gave up after `attempts` attempts.
    fn on_reconnect_exhausted(&self, _attempts: u32) {}
}

/// Handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl TransportHandler for NoopHandler {}

enum Outbound {
    Frame(String),
    Close,
}

type ConnectFuture = Shared<BoxFuture<'static, Result<(), RconError>>>;

struct State {
    phase: ConnectionState,
    should_reconnect: bool,
    attempts: u32,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    connecting: Option<ConnectFuture>,
    connect_task: Option<AbortHandle>,
    reconnect_task: Option<JoinHandle<()>>,
}

struct Inner {
    url: String,
    config: TransportConfig,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn TransportHandler>,
    state: Mutex<State>,
}

/// Reconnecting WebSocket wrapper. Cloning shares the same connection.
#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<Inner>,
}

impl WsTransport {
    /// Transport for `url` using tungstenite and no handler.
    pub fn new(url: impl Into<String>, config: TransportConfig) -> Self {
        Self::with_parts(
            url,
            config,
            Arc::new(TungsteniteConnector),
            Arc::new(NoopHandler),
        )
    }

    pub fn with_parts(
        url: impl Into<String>,
        config: TransportConfig,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn TransportHandler>,
    ) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                config,
                policy,
                connector,
                handler,
                state: Mutex::new(State {
                    phase: ConnectionState::Disconnected,
                    should_reconnect: true,
                    attempts: 0,
                    generation: 0,
                    outbound: None,
                    connecting: None,
                    connect_task: None,
                    reconnect_task: None,
                }),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_state().phase
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock_state().attempts
    }

    /// Resolve once the socket is open.
    ///
    /// Concurrent callers share one attempt; an open connection resolves
    /// immediately. Re-enables automatic reconnect after a manual
    /// [`disconnect`](Self::disconnect).
    pub async fn connect(&self) -> Result<(), RconError> {
        self.inner.lock_state().should_reconnect = true;
        Inner::connect(&self.inner).await
    }

    /// Close the socket with a normal-closure code and stop reconnecting.
    ///
    /// Cancels any scheduled or in-flight reconnect. Safe to call repeatedly.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Queue a text frame. Returns `false` if the socket is not open.
    pub fn send(&self, payload: impl Into<String>) -> bool {
        let st = self.inner.lock_state();
        if !st.phase.is_connected() {
            tracing::warn!("attempted to send message while disconnected");
            return false;
        }
        let Some(tx) = st.outbound.as_ref() else {
            return false;
        };
        if tx.send(Outbound::Frame(payload.into())).is_err() {
            tracing::error!("failed to send message: socket task is gone");
            return false;
        }
        true
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(self: &Arc<Self>) -> ConnectFuture {
        let mut st = self.lock_state();
        if st.phase.is_connected() {
            return futures::future::ready(Ok(())).boxed().shared();
        }
        if let Some(pending) = &st.connecting {
            return pending.clone();
        }

        st.generation += 1;
        st.phase = ConnectionState::Connecting;
        let task = tokio::spawn(Arc::clone(self).open(st.generation));
        st.connect_task = Some(task.abort_handle());
        let pending = async move {
            task.await
                .unwrap_or_else(|_| Err(RconError::Disconnected))
        }
        .boxed()
        .shared();
        st.connecting = Some(pending.clone());
        pending
    }

    async fn open(self: Arc<Self>, generation: u64) -> Result<(), RconError> {
        tracing::info!(url = %redact(&self.url), "connecting via WebSocket");

        let timeout = self.config.connect_timeout();
        let opened = match time::timeout(timeout, self.connector.connect(&self.url)).await {
            Ok(result) => result,
            Err(_) => Err(RconError::ConnectTimeout {
                ms: timeout.as_millis() as u64,
            }),
        };

        let socket = match opened {
            Ok(socket) => socket,
            Err(e) => {
                {
                    let mut st = self.lock_state();
                    if st.generation == generation {
                        st.connecting = None;
                        st.connect_task = None;
                        if st.phase == ConnectionState::Connecting {
                            st.phase = ConnectionState::Disconnected;
                        }
                    }
                }
                tracing::warn!(error = %e, "WebSocket connect failed");
                self.handler.on_error(&e);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut st = self.lock_state();
            if st.generation != generation {
                // Disconnected while the handshake was running.
                return Err(RconError::Disconnected);
            }
            st.phase = ConnectionState::Connected;
            st.attempts = 0;
            st.outbound = Some(tx);
            st.connecting = None;
            st.connect_task = None;
            // A loop that drove this open returns on its own; detach it so a
            // close of the new socket always schedules a fresh loop.
            st.reconnect_task = None;
        }

        tracing::info!("WebSocket connected successfully");
        self.handler.on_open();
        tokio::spawn(run_socket(
            Arc::downgrade(&self),
            Arc::clone(&self.handler),
            generation,
            socket,
            rx,
        ));
        Ok(())
    }

    fn disconnect(&self) {
        let (outbound, connect_task, reconnect_task) = {
            let mut st = self.lock_state();
            st.should_reconnect = false;
            st.generation += 1;
            st.phase = ConnectionState::Disconnected;
            st.attempts = 0;
            st.connecting = None;
            (
                st.outbound.take(),
                st.connect_task.take(),
                st.reconnect_task.take(),
            )
        };

        if let Some(task) = reconnect_task {
            task.abort();
        }
        if let Some(task) = connect_task {
            task.abort();
        }
        if let Some(tx) = outbound {
            let _ = tx.send(Outbound::Close);
            tracing::info!("WebSocket disconnected");
        }
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        let reconnect = {
            let mut st = self.lock_state();
            if st.generation != generation {
                tracing::debug!(code, "ignoring close from a superseded socket");
                return;
            }
            st.phase = ConnectionState::Disconnected;
            st.outbound = None;
            st.connecting = None;
            st.connect_task = None;
            code != CLOSE_NORMAL && st.should_reconnect
        };

        tracing::info!(code, reason = %reason, "WebSocket closed");
        self.handler.on_close(code, &reason);

        if reconnect {
            self.start_reconnect();
        }
    }

    fn start_reconnect(self: &Arc<Self>) {
        let mut st = self.lock_state();
        if let Some(task) = &st.reconnect_task {
            if !task.is_finished() {
                return;
            }
        }
        st.reconnect_task = Some(tokio::spawn(reconnect_loop(Arc::downgrade(self))));
    }

    /// Advance the attempt counter and return the delay before the next
    /// attempt, or `None` when reconnection must stop.
    fn next_backoff(&self) -> Option<std::time::Duration> {
        let mut st = self.lock_state();
        if !st.should_reconnect {
            return None;
        }
        if !self.policy.can_attempt(st.attempts) {
            let attempts = st.attempts;
            st.phase = ConnectionState::Disconnected;
            drop(st);
            tracing::error!(attempts, "max reconnection attempts reached, giving up");
            self.handler.on_reconnect_exhausted(attempts);
            return None;
        }
        st.attempts += 1;
        let attempt = st.attempts;
        if !matches!(
            st.phase,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            st.phase = ConnectionState::Backoff { attempt };
        }
        let delay = self.policy.delay_for(attempt);
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "attempting to reconnect"
        );
        Some(delay)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = st.reconnect_task.take() {
            task.abort();
        }
        if let Some(task) = st.connect_task.take() {
            task.abort();
        }
        if let Some(tx) = st.outbound.take() {
            let _ = tx.send(Outbound::Close);
        }
    }
}

/// Backoff loop: sleep, try to connect, repeat until open, disabled or out
/// of attempts. Holds only a weak reference while sleeping.
async fn reconnect_loop(inner: Weak<Inner>) {
    loop {
        let delay = match inner.upgrade().and_then(|i| i.next_backoff()) {
            Some(delay) => delay,
            None => return,
        };
        time::sleep(delay).await;

        let Some(strong) = inner.upgrade() else {
            return;
        };
        match strong.connect().await {
            Ok(()) => return,
            Err(e) => tracing::warn!(error = %e, "reconnection failed"),
        }
    }
}

async fn run_socket(
    inner: Weak<Inner>,
    handler: Arc<dyn TransportHandler>,
    generation: u64,
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let Socket {
        mut sink,
        mut stream,
    } = socket;

    let (code, reason) = loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %e, "WS send error");
                        handler.on_error(&RconError::Socket(e.to_string()));
                        break (CLOSE_ABNORMAL, e.to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "done".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    let _ = sink.close().await;
                    break (CLOSE_NORMAL, "done".to_string());
                }
            },
            msg = stream.next() => match msg {
                None => break (CLOSE_ABNORMAL, String::new()),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WS receive error");
                    handler.on_error(&RconError::Socket(e.to_string()));
                    break (CLOSE_ABNORMAL, e.to_string());
                }
                Some(Ok(Message::Text(text))) => handler.on_message(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                }
                Some(Ok(_)) => {}
            }
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.handle_close(generation, code, reason);
    }
}

/// Strip the password path segment before logging a URL.
fn redact(url: &str) -> String {
    match url.find("://").map(|i| i + 3) {
        Some(start) => match url[start..].find('/') {
            Some(slash) => format!("{}/***", &url[..start + slash]),
            None => url.to_string(),
        },
        None => url.to_string(),
    }
}
