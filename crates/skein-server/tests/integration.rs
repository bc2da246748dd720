//! End-to-end tests: HTTP transports through the router, websockets
//! against a real listener.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use skein_core::{BoxError, CloseStatus};
use skein_server::{MessageHandler, Session, SkeinServer};
use skein_settings::SkeinSettings;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Echoes every message and remembers close codes.
#[derive(Default)]
struct Echo {
    closed: Mutex<Vec<u16>>,
}

#[async_trait]
impl MessageHandler for Echo {
    async fn on_message(&self, session: &Arc<Session>, message: String) -> Result<(), BoxError> {
        session.send(message)?;
        Ok(())
    }

    async fn on_close(&self, _session: &Arc<Session>, status: &CloseStatus) -> Result<(), BoxError> {
        self.closed.lock().push(status.code);
        Ok(())
    }
}

fn server_with(settings: SkeinSettings) -> (SkeinServer, Arc<Echo>) {
    let echo = Arc::new(Echo::default());
    let server = SkeinServer::builder(settings)
        .mount("/echo", echo.clone())
        .build()
        .unwrap();
    (server, echo)
}

fn server() -> SkeinServer {
    server_with(SkeinSettings::default()).0
}

async fn call(server: &SkeinServer, method: &str, uri: &str, body: &'static str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost")
        .body(Body::from(body))
        .unwrap();
    server.router().oneshot(request).await.unwrap()
}

async fn call_from(server: &SkeinServer, method: &str, uri: &str, origin: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost")
        .header("origin", origin)
        .body(Body::empty())
        .unwrap();
    server.router().oneshot(request).await.unwrap()
}

async fn text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ── Static endpoints ──

#[tokio::test]
async fn info_with_default_settings() {
    let response = call(&server(), "GET", "/echo/info", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&text(response).await).unwrap();
    assert_eq!(json["cookie_needed"], true);
    assert_eq!(json["websocket"], true);
    assert!(json["entropy"].is_number());
}

#[tokio::test]
async fn malformed_session_paths_are_not_found() {
    let server = server();
    for (method, uri) in [
        ("GET", "/echo/abc/def/bogus-transport"),
        ("GET", "/echo/abc/de.f/xhr"),
        ("POST", "/echo/abc/de.f/xhr"),
        ("POST", "/echo/abc/def/xhr;jsessionid=1"),
    ] {
        let response = call(&server, method, uri, "").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method} {uri}");
    }
    assert!(server.service("/echo").unwrap().registry().is_empty());
}

#[tokio::test]
async fn iframe_disabled_when_origins_are_restricted() {
    let mut settings = SkeinSettings::default();
    settings.transport.allowed_origin_patterns = vec!["https://*.example.com".into()];
    let (server, _) = server_with(settings);
    let response = call(&server, "GET", "/echo/iframe.html", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn htmlfile_disabled_when_origins_are_restricted() {
    let mut settings = SkeinSettings::default();
    settings.transport.allowed_origins = vec!["https://app.example".into()];
    let (server, _) = server_with(settings);

    let response = call_from(&server, "GET", "/echo/000/s1/htmlfile?c=cb", "https://evil.example").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = call(&server, "GET", "/echo/000/s2/htmlfile?c=cb", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(server.service("/echo").unwrap().registry().is_empty());
}

#[tokio::test]
async fn rejected_origin_creates_no_session() {
    let mut settings = SkeinSettings::default();
    settings.transport.allowed_origins = vec!["https://app.example".into()];
    let (server, _) = server_with(settings);
    let registry = server.service("/echo").unwrap().registry().clone();

    let response = call_from(&server, "POST", "/echo/000/s1/xhr_streaming", "https://evil.example").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = call_from(&server, "GET", "/echo/000/s2/eventsource", "https://evil.example").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(registry.is_empty());

    let response = call_from(&server, "POST", "/echo/000/s3/xhr_streaming", "https://app.example").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(registry.get("s3").is_some());
}

// ── HTTP sessions ──

#[tokio::test]
async fn xhr_open_send_and_poll() {
    let server = server();

    let opened = call(&server, "POST", "/echo/000/s1/xhr", "").await;
    assert_eq!(text(opened).await, "o\n");

    let sent = call(&server, "POST", "/echo/000/s1/xhr_send", r#"["hello","world"]"#).await;
    assert_eq!(sent.status(), StatusCode::NO_CONTENT);

    let polled = call(&server, "POST", "/echo/000/s1/xhr", "").await;
    assert_eq!(text(polled).await, "a[\"hello\",\"world\"]\n");
}

#[tokio::test]
async fn second_attach_is_refused() {
    let server = server();
    let first = call(&server, "POST", "/echo/000/s1/xhr_streaming", "").await;
    assert_eq!(first.status(), StatusCode::OK);

    // the first response body is still open and owns the session
    let second = call(&server, "POST", "/echo/000/s1/xhr_streaming", "").await;
    let body = text(second).await;
    assert!(body.ends_with("c[2010,\"Another connection still open\"]\n"), "{body}");
    drop(first);
}

#[tokio::test]
async fn closed_session_answers_go_away() {
    let server = server();
    let _ = text(call(&server, "POST", "/echo/000/s1/xhr", "").await).await;
    let session = server.service("/echo").unwrap().registry().get("s1").unwrap();
    session.close(CloseStatus::NORMAL).await.unwrap();

    let polled = call(&server, "POST", "/echo/000/s1/xhr", "").await;
    assert_eq!(text(polled).await, "c[3000,\"Go away!\"]\n");
}

// ── Scheduler ──

#[tokio::test(start_paused = true)]
async fn idle_session_is_evicted_and_forgotten() {
    let (server, echo) = server_with(SkeinSettings::default());
    server.start();
    let _ = text(call(&server, "POST", "/echo/000/s1/xhr", "").await).await;

    // disconnect delay 5s, sweep every 1s
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(server.service("/echo").unwrap().registry().get("s1").is_none());
    assert_eq!(*echo.closed.lock(), vec![1000]);

    let send = call(&server, "POST", "/echo/000/s1/xhr_send", r#"["late"]"#).await;
    assert_eq!(send.status(), StatusCode::NOT_FOUND);
    server.stop().await;
}

#[tokio::test(start_paused = true)]
async fn idle_open_session_gets_a_heartbeat() {
    let mut settings = SkeinSettings::default();
    settings.transport.heartbeat_interval_ms = 2_000;
    settings.transport.disconnect_delay_ms = 10_000;
    let (server, _) = server_with(settings);
    server.start();
    let _ = text(call(&server, "POST", "/echo/000/s1/xhr", "").await).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    let polled = call(&server, "POST", "/echo/000/s1/xhr", "").await;
    assert_eq!(text(polled).await, "h\n");
    server.stop().await;
}

// ── Websockets ──

/// Queues a reply, then holds `on_message` until released.
#[derive(Default)]
struct Stalling {
    release: Notify,
}

#[async_trait]
impl MessageHandler for Stalling {
    async fn on_message(&self, session: &Arc<Session>, message: String) -> Result<(), BoxError> {
        session.send(format!("got {message}"))?;
        self.release.notified().await;
        Ok(())
    }
}

async fn boot() -> (Arc<SkeinServer>, String) {
    boot_with(Arc::new(Echo::default())).await
}

async fn boot_with(handler: Arc<dyn MessageHandler>) -> (Arc<SkeinServer>, String) {
    let mut settings = SkeinSettings::default();
    settings.server.shutdown_timeout_secs = 2;
    let server = Arc::new(
        SkeinServer::builder(settings)
            .mount("/echo", handler)
            .build()
            .unwrap(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = server.spawn(listener).unwrap();
    (server, format!("ws://{addr}/echo"))
}

async fn next_text(ws: &mut WsStream) -> String {
    let message = timeout(TIMEOUT, ws.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .unwrap();
    message.to_text().unwrap().to_owned()
}

async fn next_close_code(ws: &mut WsStream) -> u16 {
    loop {
        let message = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .unwrap();
        if let Message::Close(frame) = message {
            return frame.map_or(1005, |f| u16::from(f.code));
        }
    }
}

#[tokio::test]
async fn framed_websocket_echo_and_shutdown() {
    let (server, base) = boot().await;
    let (mut ws, _) = connect_async(format!("{base}/000/ws1/websocket")).await.unwrap();

    assert_eq!(next_text(&mut ws).await, "o");
    ws.send(Message::text(r#"["hi"]"#)).await.unwrap();
    assert_eq!(next_text(&mut ws).await, r#"a["hi"]"#);

    server.shutdown().await;
    assert_eq!(next_text(&mut ws).await, r#"c[1001,"Going away"]"#);
    assert_eq!(next_close_code(&mut ws).await, 1001);
}

#[tokio::test]
async fn malformed_websocket_frame_closes_with_bad_data() {
    let (server, base) = boot().await;
    let (mut ws, _) = connect_async(format!("{base}/000/ws2/websocket")).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "o");

    ws.send(Message::text("[\"unterminated")).await.unwrap();
    assert_eq!(next_text(&mut ws).await, r#"c[1007,"Bad data"]"#);
    assert_eq!(next_close_code(&mut ws).await, 1007);
    server.shutdown().await;
}

#[tokio::test]
async fn slow_handler_does_not_hold_back_outbound_frames() {
    let stalling = Arc::new(Stalling::default());
    let (server, base) = boot_with(stalling.clone()).await;
    let (mut ws, _) = connect_async(format!("{base}/000/ws3/websocket")).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "o");

    ws.send(Message::text(r#"["first"]"#)).await.unwrap();
    // on_message is still parked here
    assert_eq!(next_text(&mut ws).await, r#"a["got first"]"#);

    stalling.release.notify_one();
    server.shutdown().await;
    assert_eq!(next_close_code(&mut ws).await, 1001);
}

#[tokio::test]
async fn raw_websocket_echo_and_shutdown() {
    let (server, base) = boot().await;
    let (mut ws, _) = connect_async(format!("{base}/websocket")).await.unwrap();

    ws.send(Message::text("plain text")).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "plain text");
    assert!(server.service("/echo").unwrap().registry().is_empty());

    server.shutdown().await;
    assert_eq!(next_close_code(&mut ws).await, 1001);
}
