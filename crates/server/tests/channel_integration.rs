//! End-to-end tests of the multiplex channel over a real WebSocket.
//!
//! A listener is bound on a loopback port with a file inventory and an echo
//! shell connector; a tungstenite client plays the console. Covers the
//! channel contract: one connection/many sessions, per-session ordering,
//! non-fatal protocol errors, and full teardown on disconnect.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol::messages::{OpenSession, Ping, SessionInput};
use protocol::{ErrorCode, FrameKind, Message, MessageCodec, SessionId};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use server::channel::{ChannelListener, ChannelSettings};
use server::inventory::{FileInventory, KeyMaterial, Target};
use server::session::remote::{
    SessionError, SessionTimeouts, ShellConnector, ShellEvent, ShellStream,
};

// ---------------------------------------------------------------------------
// Echo transport
// ---------------------------------------------------------------------------

/// Connector whose shells greet with a banner and echo input back.
#[derive(Default)]
struct EchoConnector {
    /// Transport-close count across every shell this connector opened.
    closed: Arc<AtomicUsize>,
    /// (host, key pem) pairs observed during authentication.
    auth_log: Arc<StdMutex<Vec<(String, String)>>>,
}

struct EchoShell {
    banner: Option<Vec<u8>>,
    events: mpsc::UnboundedReceiver<ShellEvent>,
    loopback: mpsc::UnboundedSender<ShellEvent>,
    closed: Arc<AtomicUsize>,
}

impl ShellStream for EchoShell {
    async fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let _ = self.loopback.send(ShellEvent::Stdout(data.to_vec()));
        Ok(())
    }

    async fn resize(&mut self, _cols: u16, _rows: u16) -> Result<(), SessionError> {
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ShellEvent> {
        if let Some(banner) = self.banner.take() {
            return Some(ShellEvent::Stdout(banner));
        }
        self.events.recv().await
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl ShellConnector for EchoConnector {
    type Transport = ();
    type Shell = EchoShell;

    async fn dial(&self, _target: &Target) -> Result<(), SessionError> {
        Ok(())
    }

    async fn authenticate(
        &self,
        _transport: (),
        target: &Target,
        key: &KeyMaterial,
    ) -> Result<(), SessionError> {
        self.auth_log
            .lock()
            .unwrap()
            .push((target.host.clone(), key.pem().to_string()));

        if target.login == "rejected" {
            return Err(SessionError::AuthRejected {
                login: target.login.clone(),
                host: target.host.clone(),
            });
        }
        Ok(())
    }

    async fn open_shell(
        &self,
        _transport: (),
        _term: &str,
        _cols: u16,
        _rows: u16,
    ) -> Result<EchoShell, SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(EchoShell {
            banner: Some(b"welcome\r\n".to_vec()),
            events: rx,
            loopback: tx,
            closed: Arc::clone(&self.closed),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn write_inventory(dir: &Path, targets: &[(&str, &str, &str)]) -> std::path::PathBuf {
    // (target id, account, login) triples; one key per account.
    let mut toml = String::new();
    for (id, account, login) in targets {
        toml.push_str(&format!(
            r#"
[[targets]]
id = "{id}"
account = "{account}"
host = "{id}.internal"
login = "{login}"
region = "us-east-1"
key = "{account}-key"
"#
        ));
    }
    let mut accounts: Vec<&str> = targets.iter().map(|(_, account, _)| *account).collect();
    accounts.sort_unstable();
    accounts.dedup();
    for account in accounts {
        let key_path = dir.join(format!("{account}.pem"));
        std::fs::write(&key_path, format!("pem-for-{account}")).unwrap();
        toml.push_str(&format!(
            r#"
[[keys]]
id = "{account}-key"
account = "{account}"
region = "us-east-1"
path = "{}"
"#,
            key_path.display()
        ));
    }

    let path = dir.join("inventory.toml");
    std::fs::write(&path, toml).unwrap();
    path
}

async fn start_server(
    inventory_path: &Path,
) -> (String, Arc<AtomicUsize>, Arc<StdMutex<Vec<(String, String)>>>) {
    let inventory = Arc::new(FileInventory::load(inventory_path).unwrap());
    let connector = Arc::new(EchoConnector::default());
    let closed = Arc::clone(&connector.closed);
    let auth_log = Arc::clone(&connector.auth_log);

    let settings = ChannelSettings {
        timeouts: SessionTimeouts {
            connect: Duration::from_secs(2),
            auth: Duration::from_secs(2),
        },
        max_sessions: 16,
        term: "xterm-256color".to_string(),
    };

    let listener = ChannelListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = listener.serve(inventory, connector, settings).await;
    });

    (format!("ws://{}", addr), closed, auth_log)
}

async fn ws_connect(url: &str) -> WsClient {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send_message(ws: &mut WsClient, codec: &mut MessageCodec, message: Message) {
    let text = codec.encode(message).unwrap();
    ws.send(WsMessage::Text(text)).await.unwrap();
}

async fn next_message(ws: &mut WsClient, codec: &MessageCodec) -> Message {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for server message")
            .expect("connection closed")
            .expect("connection error");
        if let WsMessage::Text(text) = frame {
            return codec.decode(&text).unwrap().payload;
        }
    }
}

fn open(target_id: &str, account_id: &str) -> Message {
    Message::Open(OpenSession {
        target_id: target_id.to_string(),
        account_id: account_id.to_string(),
        cols: 80,
        rows: 24,
    })
}

fn input(session_id: &str, data: &[u8]) -> Message {
    Message::Input(SessionInput {
        session_id: session_id.to_string(),
        data: data.to_vec(),
    })
}

/// Read server messages until each of `count` sessions has produced its
/// opened notice, its ready frame, and its banner.
async fn open_and_await_ready(
    ws: &mut WsClient,
    codec: &mut MessageCodec,
    targets: &[&str],
    account: &str,
) -> Vec<SessionId> {
    for target in targets {
        send_message(ws, codec, open(target, account)).await;
    }

    let mut ids = Vec::new();
    let mut banners = 0;
    while banners < targets.len() {
        match next_message(ws, codec).await {
            Message::Opened(opened) => ids.push(opened.session_id),
            Message::Output(frame) if frame.kind == FrameKind::Output => banners += 1,
            Message::Output(_) => {}
            other => panic!("unexpected message during open: {:?}", other),
        }
    }
    assert_eq!(ids.len(), targets.len());
    ids
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_one_channel_many_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(
        dir.path(),
        &[
            ("i-1", "prod", "ops"),
            ("i-2", "prod", "ops"),
            ("i-3", "prod", "ops"),
        ],
    );
    let (url, _closed, _auth) = start_server(&inventory).await;

    let mut ws = ws_connect(&url).await;
    let mut codec = MessageCodec::new();

    let ids = open_and_await_ready(&mut ws, &mut codec, &["i-1", "i-2", "i-3"], "prod").await;

    // All session ids distinct
    let unique: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 3);

    // Input to the first session echoes back tagged with that id only
    send_message(&mut ws, &mut codec, input(&ids[0], b"uptime\n")).await;

    let mut saw_echo = false;
    let mut saw_output = false;
    while !(saw_echo && saw_output) {
        match next_message(&mut ws, &codec).await {
            Message::Output(frame) => {
                assert_eq!(frame.session_id, ids[0], "frame leaked across sessions");
                match frame.kind {
                    FrameKind::InputEcho => {
                        assert_eq!(frame.payload, b"uptime\n");
                        saw_echo = true;
                    }
                    FrameKind::Output => {
                        assert_eq!(frame.payload, b"uptime\n");
                        saw_output = true;
                    }
                    other => panic!("unexpected frame kind: {:?}", other),
                }
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_per_session_order_survives_interleaving() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(dir.path(), &[("i-a", "prod", "ops"), ("i-b", "prod", "ops")]);
    let (url, _closed, _auth) = start_server(&inventory).await;

    let mut ws = ws_connect(&url).await;
    let mut codec = MessageCodec::new();
    let ids = open_and_await_ready(&mut ws, &mut codec, &["i-a", "i-b"], "prod").await;

    // Alternate input between the two sessions
    for round in 0..5u8 {
        send_message(&mut ws, &mut codec, input(&ids[0], &[b'a', b'0' + round])).await;
        send_message(&mut ws, &mut codec, input(&ids[1], &[b'b', b'0' + round])).await;
    }

    // Collect the echoed output frames per session
    let mut transcripts: std::collections::HashMap<SessionId, Vec<u8>> =
        std::collections::HashMap::new();
    let mut frames_seen = 0;
    while frames_seen < 20 {
        match next_message(&mut ws, &codec).await {
            Message::Output(frame) => {
                frames_seen += 1;
                if frame.kind == FrameKind::Output {
                    transcripts
                        .entry(frame.session_id.clone())
                        .or_default()
                        .extend_from_slice(&frame.payload);
                }
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    assert_eq!(transcripts[&ids[0]], b"a0a1a2a3a4");
    assert_eq!(transcripts[&ids[1]], b"b0b1b2b3b4");
}

#[tokio::test]
async fn test_unknown_session_input_is_nonfatal() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(dir.path(), &[("i-1", "prod", "ops")]);
    let (url, _closed, _auth) = start_server(&inventory).await;

    let mut ws = ws_connect(&url).await;
    let mut codec = MessageCodec::new();

    send_message(&mut ws, &mut codec, input("unknown-id", b"ls\n")).await;

    match next_message(&mut ws, &codec).await {
        Message::Output(frame) => {
            assert_eq!(frame.session_id, "unknown-id");
            assert_eq!(frame.kind, FrameKind::System);
        }
        other => panic!("unexpected message: {:?}", other),
    }

    // Channel still works
    let ids = open_and_await_ready(&mut ws, &mut codec, &["i-1"], "prod").await;
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn test_malformed_message_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(dir.path(), &[("i-1", "prod", "ops")]);
    let (url, _closed, _auth) = start_server(&inventory).await;

    let mut ws = ws_connect(&url).await;
    let mut codec = MessageCodec::new();

    ws.send(WsMessage::Text("{not json".to_string()))
        .await
        .unwrap();

    match next_message(&mut ws, &codec).await {
        Message::Error(err) => assert_eq!(err.code, ErrorCode::ProtocolError),
        other => panic!("unexpected message: {:?}", other),
    }

    // Channel still answers control messages
    send_message(&mut ws, &mut codec, Message::Ping(Ping { timestamp: 7 })).await;
    match next_message(&mut ws, &codec).await {
        Message::Pong(pong) => assert_eq!(pong.timestamp, 7),
        other => panic!("unexpected message: {:?}", other),
    }
}

#[tokio::test]
async fn test_version_mismatch_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(dir.path(), &[("i-1", "prod", "ops")]);
    let (url, _closed, _auth) = start_server(&inventory).await;

    let mut ws = ws_connect(&url).await;
    let mut codec = MessageCodec::new();

    let stale = r#"{"version":99,"sequence":0,"payload":{"type":"Ping","data":{"timestamp":0}}}"#;
    ws.send(WsMessage::Text(stale.to_string())).await.unwrap();

    match next_message(&mut ws, &codec).await {
        Message::Error(err) => {
            assert_eq!(err.code, ErrorCode::ProtocolError);
            assert!(err.message.contains("version"));
        }
        other => panic!("unexpected message: {:?}", other),
    }

    // Sessions still open on the same channel afterwards
    let ids = open_and_await_ready(&mut ws, &mut codec, &["i-1"], "prod").await;
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn test_open_failed_for_unknown_target() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(dir.path(), &[("i-1", "prod", "ops")]);
    let (url, _closed, _auth) = start_server(&inventory).await;

    let mut ws = ws_connect(&url).await;
    let mut codec = MessageCodec::new();

    send_message(&mut ws, &mut codec, open("i-missing", "prod")).await;

    match next_message(&mut ws, &codec).await {
        Message::OpenFailed(failed) => {
            assert_eq!(failed.target_id, "i-missing");
            assert_eq!(failed.code, ErrorCode::TargetNotFound);
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[tokio::test]
async fn test_auth_failure_scoped_to_its_session() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(
        dir.path(),
        &[("i-good", "prod", "ops"), ("i-bad", "prod", "rejected")],
    );
    let (url, _closed, _auth) = start_server(&inventory).await;

    let mut ws = ws_connect(&url).await;
    let mut codec = MessageCodec::new();

    send_message(&mut ws, &mut codec, open("i-good", "prod")).await;
    send_message(&mut ws, &mut codec, open("i-bad", "prod")).await;

    let mut good_streaming = false;
    let mut bad_failed = false;
    while !(good_streaming && bad_failed) {
        match next_message(&mut ws, &codec).await {
            Message::Output(frame) if frame.kind == FrameKind::Output => {
                good_streaming = true;
            }
            Message::Closed(closed) => {
                assert_eq!(closed.code, Some(ErrorCode::AuthRejected));
                bad_failed = true;
            }
            Message::Opened(_) | Message::Output(_) => {}
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_each_account_authenticates_with_its_own_key() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(
        dir.path(),
        &[("i-prod", "prod", "ops"), ("i-staging", "staging", "ops")],
    );
    let (url, _closed, auth_log) = start_server(&inventory).await;

    let mut ws = ws_connect(&url).await;
    let mut codec = MessageCodec::new();

    send_message(&mut ws, &mut codec, open("i-prod", "prod")).await;
    send_message(&mut ws, &mut codec, open("i-staging", "staging")).await;

    let mut banners = 0;
    while banners < 2 {
        if let Message::Output(frame) = next_message(&mut ws, &codec).await {
            if frame.kind == FrameKind::Output {
                banners += 1;
            }
        }
    }

    let log = auth_log.lock().unwrap();
    let find = |host: &str| {
        log.iter()
            .find(|(h, _)| h == host)
            .map(|(_, pem)| pem.clone())
            .unwrap()
    };
    assert_eq!(find("i-prod.internal"), "pem-for-prod");
    assert_eq!(find("i-staging.internal"), "pem-for-staging");
}

#[tokio::test]
async fn test_disconnect_closes_every_session() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(
        dir.path(),
        &[
            ("i-1", "prod", "ops"),
            ("i-2", "prod", "ops"),
            ("i-3", "prod", "ops"),
        ],
    );
    let (url, closed, _auth) = start_server(&inventory).await;

    let mut ws = ws_connect(&url).await;
    let mut codec = MessageCodec::new();
    let ids = open_and_await_ready(&mut ws, &mut codec, &["i-1", "i-2", "i-3"], "prod").await;
    assert_eq!(ids.len(), 3);

    // Drop the control connection; every owned session must release its
    // transport.
    drop(ws);

    let mut waited = Duration::ZERO;
    while closed.load(Ordering::SeqCst) < 3 && waited < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert_eq!(closed.load(Ordering::SeqCst), 3);
}
