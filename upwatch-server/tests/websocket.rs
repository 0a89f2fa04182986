//! Integration tests for the handshake deadline, authenticated broadcast,
//! write serialization and HTTP surface properties (spec.md §8 P6-P8 and
//! scenarios 4-5). Each test spins up the real router on an ephemeral
//! loopback port and drives it with a `tokio-tungstenite` client for `/ws`
//! and a raw `TcpStream` for the plain-HTTP surface.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as TMessage;

use upwatch_server::app::{build_router, AppState};
use upwatch_server::websocket::ConnectionRegistry;

struct TestServer {
    addr: std::net::SocketAddr,
    registry: ConnectionRegistry,
    _handle: tokio::task::JoinHandle<()>,
}

async fn spawn_test_server(debug_mode: bool) -> TestServer {
    let registry = ConnectionRegistry::new();
    let state = AppState {
        registry: registry.clone(),
        debug_mode,
    };
    let router = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server exited");
    });

    TestServer {
        addr,
        registry,
        _handle: handle,
    }
}

async fn ws_connect(addr: std::net::SocketAddr) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>> {
    let url = format!("ws://{addr}/ws");
    let (stream, _response) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
    stream
}

async fn recv_json(stream: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>) -> Value {
    use futures_util::StreamExt;
    loop {
        match stream.next().await.expect("stream closed unexpectedly").expect("ws read error") {
            TMessage::Text(text) => return serde_json::from_str(&text).expect("frame is valid json"),
            TMessage::Ping(_) | TMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Raw HTTP/1.1 request over a plain TcpStream, used for `/health` and
/// `/test/broadcast` so the test suite doesn't need an HTTP client
/// dependency beyond what the workspace already carries.
async fn http_request(addr: std::net::SocketAddr, method: &str, path: &str, body: Option<&str>) -> (u16, String) {
    let mut conn = TcpStream::connect(addr).await.expect("connect");
    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    conn.write_all(request.as_bytes()).await.expect("write request");

    let mut raw = Vec::new();
    conn.read_to_end(&mut raw).await.expect("read response");
    let text = String::from_utf8_lossy(&raw).into_owned();

    let status_line = text.lines().next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    let response_body = text.split("\r\n\r\n").nth(1).unwrap_or_default().to_string();
    (status, response_body)
}

#[tokio::test]
async fn health_endpoint_reports_ok_status() {
    let server = spawn_test_server(false).await;

    let (status, body) = http_request(server.addr, "GET", "/health", None).await;
    assert_eq!(status, 200);

    let json: Value = serde_json::from_str(&body).expect("health body is json");
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_broadcast_route_is_absent_outside_debug_mode() {
    let server = spawn_test_server(false).await;

    let (status, _) = http_request(
        server.addr,
        "POST",
        "/test/broadcast",
        Some(r#"{"type":"test_broadcast","payload":{}}"#),
    )
    .await;

    assert_eq!(status, 404);
}

/// P6: a client that connects and never answers `hello` is closed with
/// code 1008 within the handshake deadline.
#[tokio::test]
async fn unresponsive_client_is_closed_with_policy_violation() {
    let server = spawn_test_server(false).await;
    let mut stream = ws_connect(server.addr).await;

    let hello = recv_json(&mut stream).await;
    assert_eq!(hello["type"], "hello");
    assert!(hello["payload"]["token"].as_str().is_some());

    use futures_util::StreamExt;
    let outcome = tokio::time::timeout(Duration::from_secs(7), async {
        loop {
            match stream.next().await {
                Some(Ok(TMessage::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("close should arrive within the deadline");

    let frame = outcome.expect("server should send a close frame, not just hang up");
    assert_eq!(u16::from(frame.code), 1008);
}

/// P7: a client that echoes the token is promoted and receives broadcasts;
/// a concurrent unauthenticated client receives neither `connected` nor
/// the broadcast.
#[tokio::test]
async fn authenticated_client_receives_connected_then_broadcasts() {
    let server = spawn_test_server(true).await;

    let mut authed = ws_connect(server.addr).await;
    let hello = recv_json(&mut authed).await;
    let token = hello["payload"]["token"].as_str().unwrap().to_string();

    use futures_util::SinkExt;
    authed
        .send(TMessage::Text(
            json!({"type": "hello_ack", "payload": {"token": token}}).to_string().into(),
        ))
        .await
        .expect("send hello_ack");

    let connected = recv_json(&mut authed).await;
    assert_eq!(connected["type"], "connected");
    assert!(connected["payload"]["timestamp"].as_str().is_some());

    let mut silent = ws_connect(server.addr).await;
    let _ = recv_json(&mut silent).await; // its own hello, never acknowledged

    // Wait for the registry to actually reflect one authenticated peer
    // before broadcasting, since promotion happens asynchronously relative
    // to this test task.
    for _ in 0..50 {
        if server.registry.authenticated_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.registry.authenticated_count(), 1);

    let (status, _) = http_request(
        server.addr,
        "POST",
        "/test/broadcast",
        Some(r#"{"type":"test_broadcast","payload":{"foo":"bar"}}"#),
    )
    .await;
    assert_eq!(status, 200);

    let broadcast = recv_json(&mut authed).await;
    assert_eq!(broadcast["type"], "test_broadcast");
    assert_eq!(broadcast["payload"]["foo"], "bar");

    // The unauthenticated client must not see the broadcast; its next
    // frame (if any arrives before the handshake deadline fires) can only
    // be its own policy-violation close.
    use futures_util::StreamExt;
    let silent_next = tokio::time::timeout(Duration::from_secs(6), silent.next()).await;
    if let Ok(Some(Ok(frame))) = silent_next {
        match frame {
            TMessage::Close(_) => {}
            other => panic!("unauthenticated client should not receive application frames, got {other:?}"),
        }
    }
}

/// P8: concurrent broadcasts never interleave partial frames on a single
/// connection — every received frame parses as one complete JSON object.
#[tokio::test]
async fn concurrent_broadcasts_never_interleave_frames() {
    let server = spawn_test_server(true).await;

    let mut authed = ws_connect(server.addr).await;
    let hello = recv_json(&mut authed).await;
    let token = hello["payload"]["token"].as_str().unwrap().to_string();

    use futures_util::SinkExt;
    authed
        .send(TMessage::Text(
            json!({"type": "hello_ack", "payload": {"token": token}}).to_string().into(),
        ))
        .await
        .expect("send hello_ack");
    let _connected = recv_json(&mut authed).await;

    for _ in 0..50 {
        if server.registry.authenticated_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    const N: usize = 20;
    let mut senders = Vec::new();
    for i in 0..N {
        let addr = server.addr;
        senders.push(tokio::spawn(async move {
            let body = json!({"type": "test_broadcast", "payload": {"seq": i}}).to_string();
            http_request(addr, "POST", "/test/broadcast", Some(&body)).await
        }));
    }
    for sender in senders {
        let (status, _) = sender.await.expect("broadcast task panicked");
        assert_eq!(status, 200);
    }

    let mut seqs = Vec::new();
    for _ in 0..N {
        let frame = recv_json(&mut authed).await;
        assert_eq!(frame["type"], "test_broadcast");
        seqs.push(frame["payload"]["seq"].as_u64().expect("well-formed, unsplit frame"));
    }
    seqs.sort_unstable();
    seqs.dedup();
    assert_eq!(seqs.len(), N, "every broadcast must arrive exactly once, undamaged");
}

/// P1, end-to-end: a line appended to the tailed file travels through the
/// tailer, the detection bridge and the broadcaster to an authenticated
/// `/ws` client as a `screenshot_detected` frame.
#[tokio::test]
async fn appended_log_line_reaches_an_authenticated_client() {
    use std::io::Write;
    use tokio_util::sync::CancellationToken;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("upwork.2025-05-12.log"), "").unwrap();

    let server = spawn_test_server(false).await;
    let cancel = CancellationToken::new();
    let events = upwatch_core::tailer::spawn(dir.path().to_path_buf(), cancel.clone());
    let detection_task = tokio::spawn(upwatch_server::detection::run(events, server.registry.clone()));

    let mut client = ws_connect(server.addr).await;
    let hello = recv_json(&mut client).await;
    let token = hello["payload"]["token"].as_str().unwrap().to_string();

    use futures_util::SinkExt;
    client
        .send(TMessage::Text(
            json!({"type": "hello_ack", "payload": {"token": token}}).to_string().into(),
        ))
        .await
        .expect("send hello_ack");
    let _connected = recv_json(&mut client).await;

    // Give the tailer time to open the file at EOF before we append.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join("upwork.2025-05-12.log"))
        .unwrap();
    writeln!(file, "[2025-05-12T11:26:23.318] Electron Screensnap succeeded.").unwrap();

    let detected = tokio::time::timeout(Duration::from_secs(5), recv_json(&mut client))
        .await
        .expect("screenshot_detected should arrive within the deadline");

    assert_eq!(detected["type"], "screenshot_detected");
    assert_eq!(detected["payload"]["timestamp"], "11:26:23");

    cancel.cancel();
    detection_task.abort();
}
