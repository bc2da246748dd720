//! Websocket transport, framed (`/{server}/{session}/websocket`) and raw
//! (`/websocket`).
//!
//! After the upgrade the connection owns its session for its whole life.
//! A writer task drains the session queue onto the socket while the
//! connection task hands inbound text frames to the application, so a slow
//! handler never holds back outbound frames. Either side closing, or the
//! handler being stopped, ends both.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use skein_core::{CloseStatus, Frame, SessionId, TransportError};
use skein_hooks::Attributes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{KindFactory, SessionFactory, TransportHandler, TransportKind, Upgrader};
use crate::handler::{MessageHandler, Principal};
use crate::service::Rejection;
use crate::session::{Drained, Session, SessionInit, SessionKind};

/// Whether frames are wrapped in protocol framing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Framing {
    Framed,
    Raw,
}

/// Websocket transport handler.
pub struct WebSocketTransport {
    factory: KindFactory,
    running: AtomicBool,
    // replaced on every start; cancelled on stop
    shutdown: Mutex<CancellationToken>,
}

impl WebSocketTransport {
    /// Create a running handler; `capacity` bounds each session's queue.
    pub fn new(capacity: usize) -> Self {
        Self {
            factory: KindFactory {
                kind: SessionKind::WebSocket,
                capacity,
            },
            running: AtomicBool::new(true),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    async fn accept(
        &self,
        request: Request<Body>,
        session: Arc<Session>,
        framing: Framing,
    ) -> Response {
        if !self.is_running() {
            debug!(session_id = %session.id(), "websocket handler stopped");
            return Rejection::ServiceUnavailable.into_response();
        }
        let (mut parts, _body) = request.into_parts();
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => {
                debug!(session_id = %session.id(), reason = %rejection, "websocket upgrade refused");
                return rejection.into_response();
            }
        };
        let cancel = self.shutdown.lock().clone();
        upgrade.on_upgrade(move |socket| run_connection(socket, session, framing, cancel))
    }
}

#[async_trait]
impl TransportHandler for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn accepts(&self, session: &Session) -> bool {
        session.kind() == SessionKind::WebSocket
    }

    fn session_factory(&self) -> Option<&dyn SessionFactory> {
        Some(&self.factory)
    }

    fn upgrader(&self) -> Option<&dyn Upgrader> {
        Some(self)
    }

    async fn handle(&self, request: Request<Body>, session: Arc<Session>) -> Result<Response, TransportError> {
        Ok(self.accept(request, session, Framing::Framed).await)
    }

    fn start(&self) {
        *self.shutdown.lock() = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.lock().cancel();
        info!("websocket handler stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upgrader for WebSocketTransport {
    async fn upgrade(
        &self,
        request: Request<Body>,
        handler: Arc<dyn MessageHandler>,
        attributes: Attributes,
        principal: Option<Principal>,
    ) -> Result<Response, TransportError> {
        let session = Session::new(SessionInit {
            id: SessionId::generate(),
            kind: SessionKind::Raw,
            handler,
            attributes,
            principal,
            capacity: self.factory.capacity,
        });
        Ok(self.accept(request, session, Framing::Raw).await)
    }
}

type Tx = SplitSink<WebSocket, Message>;
type Rx = SplitStream<WebSocket>;

#[instrument(skip_all, fields(session_id = %session.id()))]
async fn run_connection(
    socket: WebSocket,
    session: Arc<Session>,
    framing: Framing,
    cancel: CancellationToken,
) {
    let Ok(_guard) = session.try_attach() else {
        warn!("session already has a connection");
        return;
    };
    let (mut tx, mut rx) = socket.split();

    if framing == Framing::Framed && !send_text(&mut tx, Frame::Open.encode()).await {
        close_quietly(&session, CloseStatus::SERVER_ERROR).await;
        return;
    }
    let mut writer = tokio::spawn(write_loop(tx, Arc::clone(&session), framing, cancel));

    // a failing open hook closes the session; the writer then writes the close
    if let Err(e) = session.open().await {
        debug!(error = %e, "open hook failed");
    }

    if !read_loop(&mut rx, &session, framing, &mut writer).await {
        // the session is closed; wait for the close frame to go out
        let _ = writer.await;
    }
    debug!("websocket connection finished");
}

/// Drain queued frames onto the socket until the session closes.
async fn write_loop(mut tx: Tx, session: Arc<Session>, framing: Framing, cancel: CancellationToken) {
    loop {
        tokio::select! {
            drained = session.next_frame() => match drained {
                Drained::Frame(frame) => {
                    if !write_frame(&mut tx, frame, framing).await {
                        close_quietly(&session, CloseStatus::SERVER_ERROR).await;
                        return;
                    }
                }
                Drained::Closed(status) => {
                    send_close(&mut tx, &status, framing).await;
                    return;
                }
            },
            () = cancel.cancelled() => {
                close_quietly(&session, CloseStatus::GOING_AWAY).await;
                send_close(&mut tx, &CloseStatus::GOING_AWAY, framing).await;
                return;
            }
        }
    }
}

/// Hand inbound frames to the session. Returns `true` once the writer
/// has finished, `false` when the read side ended first.
async fn read_loop(
    rx: &mut Rx,
    session: &Arc<Session>,
    framing: Framing,
    writer: &mut JoinHandle<()>,
) -> bool {
    loop {
        tokio::select! {
            _ = &mut *writer => return true,
            inbound = rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let delivered = match framing {
                        Framing::Framed => session.deliver_inbound(text.as_str()).await,
                        Framing::Raw => session.deliver_messages(vec![text.to_string()]).await,
                    };
                    // on failure the session is already closed and the
                    // writer is sending the close frame
                    if let Err(e) = delivered {
                        debug!(error = %e, "inbound delivery failed");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let status = frame.map_or(CloseStatus::NORMAL, |f| {
                        CloseStatus::new(f.code, f.reason.to_string())
                    });
                    debug!(status = %status, "peer closed connection");
                    close_quietly(session, status).await;
                    return false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read failed");
                    close_quietly(session, CloseStatus::SERVER_ERROR).await;
                    return false;
                }
                None => {
                    close_quietly(session, CloseStatus::NORMAL).await;
                    return false;
                }
            },
        }
    }
}

async fn write_frame(tx: &mut Tx, frame: Frame, framing: Framing) -> bool {
    match (framing, frame) {
        (Framing::Framed, frame) => send_text(tx, frame.encode()).await,
        (Framing::Raw, Frame::Messages(messages)) => {
            for message in messages {
                if !send_text(tx, message).await {
                    return false;
                }
            }
            true
        }
        (Framing::Raw, _) => true,
    }
}

async fn send_text(tx: &mut Tx, text: String) -> bool {
    tx.send(Message::Text(text.into())).await.is_ok()
}

async fn send_close(tx: &mut Tx, status: &CloseStatus, framing: Framing) {
    if framing == Framing::Framed {
        let _ = send_text(tx, Frame::Close(status.clone()).encode()).await;
    }
    let frame = CloseFrame {
        code: status.code,
        reason: status.reason.to_string().into(),
    };
    let _ = tx.send(Message::Close(Some(frame))).await;
}

async fn close_quietly(session: &Arc<Session>, status: CloseStatus) {
    if let Err(e) = session.close(status).await {
        warn!(session_id = %session.id(), error = %e, "failed to close session");
    }
}
