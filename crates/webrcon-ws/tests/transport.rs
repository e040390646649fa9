mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{settle, FakeConnector};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use webrcon_core::config::TransportConfig;
use webrcon_core::error::RconError;
use webrcon_core::policy::ReconnectConfig;
use webrcon_core::state::ConnectionState;
use webrcon_ws::transport::{TransportHandler, WsTransport};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl TransportHandler for Recorder {
    fn on_open(&self) {
        self.events.lock().unwrap().push("open".into());
    }

    fn on_message(&self, raw: &str) {
        self.events.lock().unwrap().push(format!("msg:{raw}"));
    }

    fn on_close(&self, code: u16, _reason: &str) {
        self.events.lock().unwrap().push(format!("close:{code}"));
    }

    fn on_reconnect_exhausted(&self, attempts: u32) {
        self.events.lock().unwrap().push(format!("exhausted:{attempts}"));
    }
}

fn transport(
    config: TransportConfig,
) -> (
    WsTransport,
    Arc<FakeConnector>,
    Arc<Recorder>,
    tokio::sync::mpsc::UnboundedReceiver<common::ServerSide>,
) {
    let (connector, servers) = FakeConnector::new();
    let recorder = Arc::new(Recorder::default());
    let t = WsTransport::with_parts(
        "ws://127.0.0.1:28016/pw",
        config,
        connector.clone(),
        recorder.clone(),
    );
    (t, connector, recorder, servers)
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_socket() {
    let (t, connector, recorder, _servers) = transport(TransportConfig::default());

    let (a, b) = tokio::join!(t.connect(), t.connect());
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(connector.attempts(), 1);

    t.connect().await.unwrap();
    assert_eq!(connector.attempts(), 1);
    assert_eq!(t.state(), ConnectionState::Connected);
    assert_eq!(recorder.take(), vec!["open"]);
}

#[tokio::test(start_paused = true)]
async fn connect_times_out() {
    let (t, connector, _, _servers) = transport(TransportConfig::default());
    connector.set_hanging(true);

    let started = Instant::now();
    let err = t.connect().await.unwrap_err();
    assert_eq!(err, RconError::ConnectTimeout { ms: 5_000 });
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(t.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn connect_error_is_reported_and_not_retried() {
    let (t, connector, _, _servers) = transport(TransportConfig::default());
    connector.set_failing(true);

    let err = t.connect().await.unwrap_err();
    assert!(matches!(err, RconError::Connect(_)));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 1);

    // The next explicit connect starts clean.
    connector.set_failing(false);
    t.connect().await.unwrap();
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn frames_are_delivered_in_order() {
    let (t, _, recorder, mut servers) = transport(TransportConfig::default());
    t.connect().await.unwrap();
    let server = servers.recv().await.unwrap();

    server.push_raw("one");
    server.push_raw("two");
    server.push_raw("three");
    settle().await;

    assert_eq!(recorder.take(), vec!["open", "msg:one", "msg:two", "msg:three"]);
}

#[tokio::test(start_paused = true)]
async fn send_reaches_server() {
    let (t, _, _, mut servers) = transport(TransportConfig::default());
    assert!(!t.send("early"));

    t.connect().await.unwrap();
    let mut server = servers.recv().await.unwrap();
    assert!(t.send("hello"));
    assert_eq!(server.next_text().await, "hello");
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_after_backoff() {
    let (t, connector, recorder, mut servers) = transport(TransportConfig::default());
    t.connect().await.unwrap();
    let mut first = servers.recv().await.unwrap();

    let dropped_at = Instant::now();
    first.drop_connection();
    let mut second = servers.recv().await.unwrap();
    let waited = dropped_at.elapsed();

    assert!(waited >= Duration::from_millis(1_000), "waited {waited:?}");
    assert!(waited < Duration::from_millis(1_100), "waited {waited:?}");
    assert_eq!(connector.attempts(), 2);
    settle().await;
    assert_eq!(t.state(), ConnectionState::Connected);
    assert_eq!(t.reconnect_attempts(), 0);
    assert_eq!(recorder.take(), vec!["open", "close:1006", "open"]);

    assert!(t.send("after reconnect"));
    assert_eq!(second.next_text().await, "after reconnect");
}

#[tokio::test(start_paused = true)]
async fn failed_reconnects_back_off_exponentially() {
    let (t, connector, _, mut servers) = transport(TransportConfig::default());
    t.connect().await.unwrap();
    let mut server = servers.recv().await.unwrap();

    connector.set_failing(true);
    server.close(CloseCode::Away);

    // Attempt 1 after 1000ms, attempt 2 after a further 1300ms.
    tokio::time::sleep(Duration::from_millis(1_005)).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(t.state(), ConnectionState::Backoff { attempt: 2 });

    tokio::time::sleep(Duration::from_millis(1_290)).await;
    assert_eq!(connector.attempts(), 2);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.attempts(), 3);
    assert_eq!(t.reconnect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn normal_close_from_server_does_not_reconnect() {
    let (t, connector, recorder, mut servers) = transport(TransportConfig::default());
    t.connect().await.unwrap();
    let server = servers.recv().await.unwrap();

    server.close(CloseCode::Normal);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(t.state(), ConnectionState::Disconnected);
    assert_eq!(recorder.take(), vec!["open", "close:1000"]);
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_at_ceiling() {
    let config = TransportConfig {
        reconnect: ReconnectConfig {
            max_attempts: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let (t, connector, recorder, mut servers) = transport(config);
    t.connect().await.unwrap();
    let mut server = servers.recv().await.unwrap();

    connector.set_failing(true);
    server.drop_connection();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(connector.attempts(), 3);
    assert_eq!(t.state(), ConnectionState::Disconnected);
    assert_eq!(recorder.take(), vec!["open", "close:1006", "exhausted:2"]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_backoff_cancels_reconnect() {
    let (t, connector, recorder, mut servers) = transport(TransportConfig::default());
    t.connect().await.unwrap();
    let mut server = servers.recv().await.unwrap();

    server.drop_connection();
    settle().await;
    assert_eq!(t.state(), ConnectionState::Backoff { attempt: 1 });

    t.disconnect();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(t.state(), ConnectionState::Disconnected);
    assert_eq!(recorder.take(), vec!["open", "close:1006"]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_in_flight_reconnect() {
    let (t, connector, _, mut servers) = transport(TransportConfig::default());
    t.connect().await.unwrap();
    let mut server = servers.recv().await.unwrap();

    connector.set_hanging(true);
    server.drop_connection();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(t.state(), ConnectionState::Connecting);

    t.disconnect();
    connector.set_hanging(false);
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(connector.attempts(), 2);
    assert_eq!(t.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_sends_normal_close_and_ignores_stale_socket() {
    let (t, connector, recorder, mut servers) = transport(TransportConfig::default());
    t.connect().await.unwrap();
    let mut server = servers.recv().await.unwrap();

    t.disconnect();
    assert_eq!(t.state(), ConnectionState::Disconnected);
    assert!(!t.send("nope"));
    assert_eq!(server.next_close().await, Some(1000));

    server.drop_connection();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(recorder.take(), vec!["open"]);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_after_disconnect_rearms_reconnect() {
    let (t, connector, _, mut servers) = transport(TransportConfig::default());
    t.connect().await.unwrap();
    let _first = servers.recv().await.unwrap();
    t.disconnect();

    t.connect().await.unwrap();
    let mut second = servers.recv().await.unwrap();
    assert_eq!(connector.attempts(), 2);

    second.drop_connection();
    let _third = servers.recv().await.unwrap();
    assert_eq!(connector.attempts(), 3);
    settle().await;
    assert_eq!(t.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn reconnected_socket_closed_at_handshake_keeps_reconnecting() {
    let (t, connector, recorder, mut servers) = transport(TransportConfig::default());
    t.connect().await.unwrap();
    let mut first = servers.recv().await.unwrap();

    connector.set_close_on_open(Some(CloseCode::Away));
    first.drop_connection();

    // Every reconnect opens and is closed at once; each open resets the
    // counter, so the loop keeps going at the base delay.
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    let attempts = connector.attempts();
    assert!(attempts >= 5, "reconnect stalled after {attempts} attempts");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(connector.attempts() > attempts);
    assert_ne!(t.state(), ConnectionState::Disconnected);

    connector.set_close_on_open(None);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(t.state(), ConnectionState::Connected);
    let events = recorder.take();
    assert!(events.iter().filter(|e| *e == "close:1001").count() >= 5);
    assert!(!events.iter().any(|e| e.starts_with("exhausted")));
}
