//! In-memory connector for driving the transport without a network.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use webrcon_core::error::RconError;
use webrcon_ws::transport::{Connector, Socket};

/// Server end of one fake socket.
pub struct ServerSide {
    from_client: fmpsc::UnboundedReceiver<Message>,
    to_client: Option<fmpsc::UnboundedSender<Result<Message, WsError>>>,
}

impl ServerSide {
    /// Next text frame the client sent.
    pub async fn next_text(&mut self) -> String {
        loop {
            match self.from_client.next().await {
                Some(Message::Text(text)) => return text.to_string(),
                Some(_) => continue,
                None => panic!("client closed the socket"),
            }
        }
    }

    /// Next request as `(command, identifier)`.
    pub async fn next_request(&mut self) -> (String, i32) {
        let raw = self.next_text().await;
        let v: serde_json::Value = serde_json::from_str(&raw).expect("client sent invalid JSON");
        (
            v["Message"].as_str().expect("Message").to_string(),
            v["Identifier"].as_i64().expect("Identifier") as i32,
        )
    }

    /// Wait for the client's close frame and return its code.
    pub async fn next_close(&mut self) -> Option<u16> {
        loop {
            match self.from_client.next().await {
                Some(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    pub fn push_raw(&self, raw: &str) {
        if let Some(tx) = &self.to_client {
            tx.unbounded_send(Ok(Message::Text(raw.to_string().into())))
                .expect("client stream dropped");
        }
    }

    pub fn reply(&self, id: i32, message: &str) {
        let frame = serde_json::json!({
            "Message": message,
            "Identifier": id,
            "Type": "Generic",
            "Stacktrace": "",
        });
        self.push_raw(&frame.to_string());
    }

    /// Close with an explicit close frame.
    pub fn close(&self, code: CloseCode) {
        if let Some(tx) = &self.to_client {
            let frame = CloseFrame {
                code,
                reason: "".into(),
            };
            let _ = tx.unbounded_send(Ok(Message::Close(Some(frame))));
        }
    }

    /// Vanish without a close frame (abnormal closure).
    pub fn drop_connection(&mut self) {
        self.to_client = None;
    }
}

#[derive(Default)]
struct ConnectorState {
    attempts: usize,
    failing: bool,
    hanging: bool,
    close_on_open: Option<CloseCode>,
}

/// Connector handing the server end of each socket to the test.
pub struct FakeConnector {
    state: Mutex<ConnectorState>,
    servers: mpsc::UnboundedSender<ServerSide>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                state: Mutex::new(ConnectorState::default()),
                servers,
            }),
            rx,
        )
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Refuse every following connect.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    /// Never complete following connects.
    pub fn set_hanging(&self, hanging: bool) {
        self.state.lock().unwrap().hanging = hanging;
    }

    /// Hand out following sockets with a close frame already queued.
    pub fn set_close_on_open(&self, code: Option<CloseCode>) {
        self.state.lock().unwrap().close_on_open = code;
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<Socket, RconError> {
        let (failing, hanging, close_on_open) = {
            let mut st = self.state.lock().unwrap();
            st.attempts += 1;
            (st.failing, st.hanging, st.close_on_open)
        };
        if hanging {
            futures::future::pending::<()>().await;
        }
        if failing {
            return Err(RconError::Connect("connection refused".into()));
        }

        let (client_tx, from_client) = fmpsc::unbounded::<Message>();
        let (to_client, client_rx) = fmpsc::unbounded::<Result<Message, WsError>>();
        let server = ServerSide {
            from_client,
            to_client: Some(to_client),
        };
        if let Some(code) = close_on_open {
            server.close(code);
        }
        let _ = self.servers.send(server);

        Ok(Socket {
            sink: Box::pin(client_tx.sink_map_err(|_| WsError::ConnectionClosed)),
            stream: Box::pin(client_rx),
        })
    }
}

/// Let spawned tasks drain their queues. Under a paused clock this returns
/// as soon as every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
