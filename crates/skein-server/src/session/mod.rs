//! Sessions: one logical connection, independent of the transport that
//! carries its traffic at any moment.
//!
//! A session owns the outbound queue and the activity timestamps. HTTP
//! transports attach for the length of one request through
//! [`Session::try_attach`]; the websocket transport attaches once for the
//! lifetime of its connection. Whoever is attached pulls frames with
//! `next_frame`, which waits on a [`Notify`] until something is queued.

pub mod registry;
pub mod scheduler;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use skein_core::frames::decode_messages;
use skein_core::{CloseStatus, Frame, SessionError, SessionId, TransportError};
use skein_hooks::Attributes;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::handler::{MessageHandler, Principal};
use crate::metrics::{SESSIONS_CLOSED_TOTAL, SESSIONS_OPENED_TOTAL};

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, open frame not yet written.
    New,
    /// Open frame written; messages flow.
    Open,
    /// Closed; nothing more is accepted or delivered.
    Closed,
}

/// Transport style a session was created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    /// One response per poll (`xhr`).
    Polling,
    /// Long-lived HTTP response (`xhr_streaming`, `eventsource`, `htmlfile`).
    Streaming,
    /// Framed websocket connection.
    WebSocket,
    /// Unframed websocket connection on the bare `/websocket` path.
    Raw,
}

impl SessionKind {
    /// Whether the session is carried by plain HTTP requests.
    pub fn is_http(self) -> bool {
        matches!(self, Self::Polling | Self::Streaming)
    }
}

/// Next thing an attached writer has to put on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Drained {
    /// A messages batch or a heartbeat.
    Frame(Frame),
    /// The session is closed; write the close frame and stop.
    Closed(CloseStatus),
}

/// Everything needed to build a [`Session`].
pub struct SessionInit {
    /// Session id from the request path (or generated for raw sockets).
    pub id: SessionId,
    /// Transport style.
    pub kind: SessionKind,
    /// Application handler for this session.
    pub handler: Arc<dyn MessageHandler>,
    /// Attributes collected by handshake interceptors.
    pub attributes: Attributes,
    /// Principal of the creating request.
    pub principal: Option<Principal>,
    /// Maximum number of queued outbound messages.
    pub capacity: usize,
}

struct Inner {
    state: SessionState,
    queue: VecDeque<String>,
    heartbeat_pending: bool,
    last_active: Instant,
    last_traffic: Instant,
    attached: bool,
    close_status: Option<CloseStatus>,
}

/// One logical bidirectional connection.
pub struct Session {
    id: SessionId,
    kind: SessionKind,
    handler: Arc<dyn MessageHandler>,
    attributes: Attributes,
    principal: Option<Principal>,
    created_at: Instant,
    capacity: usize,
    inner: Mutex<Inner>,
    wake: Notify,
    // held while inbound messages are handed to the application
    inbound: tokio::sync::Mutex<()>,
}

impl Session {
    /// Create a session in the NEW state.
    pub fn new(init: SessionInit) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id: init.id,
            kind: init.kind,
            handler: init.handler,
            attributes: init.attributes,
            principal: init.principal,
            created_at: now,
            capacity: init.capacity,
            inner: Mutex::new(Inner {
                state: SessionState::New,
                queue: VecDeque::new(),
                heartbeat_pending: false,
                last_active: now,
                last_traffic: now,
                attached: false,
                close_status: None,
            }),
            wake: Notify::new(),
            inbound: tokio::sync::Mutex::new(()),
        })
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Transport style the session was created with.
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Whether the session is OPEN.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Whether the session is CLOSED.
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Attributes collected during the handshake.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Principal the session was created for.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Status the session was closed with.
    pub fn close_status(&self) -> Option<CloseStatus> {
        self.inner.lock().close_status.clone()
    }

    /// Number of messages waiting to be flushed.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Queue a message for the client.
    ///
    /// Fails fast on a closed session or a full queue; nothing is dropped
    /// from the queue to make room.
    pub fn send(&self, message: impl Into<String>) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Closed {
                return Err(SessionError::Closed(self.id.clone()));
            }
            if inner.queue.len() >= self.capacity {
                return Err(SessionError::QueueFull {
                    session_id: self.id.clone(),
                    capacity: self.capacity,
                });
            }
            inner.queue.push_back(message.into());
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Time since the client was last reachable.
    ///
    /// A NEW session counts from creation, an attached session is always
    /// active, otherwise the clock runs from the last detach or inbound
    /// message.
    pub fn time_since_last_active(&self) -> Duration {
        let inner = self.inner.lock();
        match inner.state {
            SessionState::New => self.created_at.elapsed(),
            _ if inner.attached => Duration::ZERO,
            _ => inner.last_active.elapsed(),
        }
    }

    /// Close the session. Later calls are no-ops.
    ///
    /// Wakes the attached writer so it can write the close frame, then
    /// notifies the application.
    pub async fn close(self: &Arc<Self>, status: CloseStatus) -> Result<(), TransportError> {
        {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Closed {
                return Ok(());
            }
            inner.state = SessionState::Closed;
            inner.close_status = Some(status.clone());
            inner.queue.clear();
            inner.heartbeat_pending = false;
        }
        self.wake.notify_one();
        counter!(SESSIONS_CLOSED_TOTAL).increment(1);
        info!(session_id = %self.id, status = %status, "session closed");

        self.handler
            .on_close(self, &status)
            .await
            .map_err(|e| TransportError::new(self.id.clone(), "close handler failed").with_source(e))
    }

    /// Move NEW to OPEN and run the application's open hook.
    ///
    /// Returns `false` if the session was not NEW.
    pub(crate) async fn open(self: &Arc<Self>) -> Result<bool, TransportError> {
        {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::New {
                return Ok(false);
            }
            inner.state = SessionState::Open;
            let now = Instant::now();
            inner.last_active = inner.last_active.max(now);
            inner.last_traffic = now;
        }
        counter!(SESSIONS_OPENED_TOTAL).increment(1);
        info!(session_id = %self.id, kind = ?self.kind, "session opened");

        if let Err(e) = self.handler.on_open(self).await {
            let err = TransportError::new(self.id.clone(), "open handler failed").with_source(e);
            return Err(self.fail(err, CloseStatus::SERVER_ERROR).await);
        }
        Ok(true)
    }

    /// Decode an inbound payload and hand the messages to the application.
    ///
    /// A payload that does not decode closes the session with `BAD_DATA`.
    pub(crate) async fn deliver_inbound(self: &Arc<Self>, payload: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        match decode_messages(payload) {
            Ok(messages) => self.deliver_messages(messages).await,
            Err(e) => {
                let err = TransportError::new(self.id.clone(), "failed to decode inbound messages")
                    .with_source(e);
                Err(self.fail(err, CloseStatus::BAD_DATA).await)
            }
        }
    }

    /// Hand already-decoded messages to the application, in order.
    pub(crate) async fn deliver_messages(
        self: &Arc<Self>,
        messages: Vec<String>,
    ) -> Result<(), TransportError> {
        let _order = self.inbound.lock().await;
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.touch();
        for message in messages {
            if let Err(e) = self.handler.on_message(self, message).await {
                let err =
                    TransportError::new(self.id.clone(), "message handler failed").with_source(e);
                return Err(self.fail(err, CloseStatus::SERVER_ERROR).await);
            }
        }
        Ok(())
    }

    /// Report a transport failure to the application and close.
    pub(crate) async fn fail(self: &Arc<Self>, error: TransportError, status: CloseStatus) -> TransportError {
        error!(session_id = %self.id, error = %error, "session transport failed");
        self.handler.on_transport_error(self, &error).await;
        if let Err(close_err) = self.close(status).await {
            warn!(session_id = %self.id, error = %close_err, "close after transport failure failed");
        }
        error
    }

    /// Claim the session for one writer.
    pub(crate) fn try_attach(self: &Arc<Self>) -> Result<AttachGuard, SessionError> {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return Err(SessionError::Closed(self.id.clone()));
        }
        if inner.attached {
            return Err(SessionError::AlreadyAttached(self.id.clone()));
        }
        inner.attached = true;
        Ok(AttachGuard {
            session: Arc::clone(self),
        })
    }

    /// Whether a writer currently owns the session.
    pub(crate) fn is_attached(&self) -> bool {
        self.inner.lock().attached
    }

    /// Queue a heartbeat if the session is OPEN and silent for `interval`.
    ///
    /// At most one heartbeat is pending at a time.
    pub(crate) fn heartbeat_if_idle(&self, interval: Duration) -> bool {
        let enqueued = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Open
                || inner.heartbeat_pending
                || inner.last_traffic.elapsed() < interval
            {
                false
            } else {
                inner.heartbeat_pending = true;
                true
            }
        };
        if enqueued {
            self.wake.notify_one();
        }
        enqueued
    }

    /// Take whatever is pending without waiting.
    ///
    /// Queued messages come out as one batch; a pending heartbeat is only
    /// written when no message is waiting.
    pub(crate) fn try_drain(&self) -> Option<Drained> {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            let status = inner.close_status.clone().unwrap_or(CloseStatus::NORMAL);
            return Some(Drained::Closed(status));
        }
        let frame = if !inner.queue.is_empty() {
            Frame::Messages(inner.queue.drain(..).collect())
        } else if inner.heartbeat_pending {
            Frame::Heartbeat
        } else {
            return None;
        };
        inner.heartbeat_pending = false;
        inner.last_traffic = Instant::now();
        Some(Drained::Frame(frame))
    }

    /// Wait until there is something to write.
    pub(crate) async fn next_frame(&self) -> Drained {
        loop {
            let notified = self.wake.notified();
            if let Some(drained) = self.try_drain() {
                return drained;
            }
            notified.await;
        }
    }

    fn touch(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.last_active = inner.last_active.max(now);
        inner.last_traffic = inner.last_traffic.max(now);
    }

    fn closed_error(&self) -> TransportError {
        TransportError::new(self.id.clone(), "session is closed")
            .with_source(SessionError::Closed(self.id.clone()))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Exclusive claim on a session's outbound side. Dropping it detaches.
#[derive(Debug)]
pub(crate) struct AttachGuard {
    session: Arc<Session>,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        let mut inner = self.session.inner.lock();
        inner.attached = false;
        inner.last_active = inner.last_active.max(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingHandler, session_with};
    use assert_matches::assert_matches;

    #[test]
    fn new_session_is_new() {
        let (session, _) = session_with(SessionKind::Polling, 10);
        assert_eq!(session.state(), SessionState::New);
        assert!(session.kind().is_http());
        assert!(!SessionKind::WebSocket.is_http());
    }

    #[test]
    fn queued_messages_drain_as_one_batch() {
        let (session, _) = session_with(SessionKind::Polling, 10);
        session.send("a").unwrap();
        session.send("b").unwrap();
        assert_eq!(session.queued(), 2);
        assert_eq!(
            session.try_drain(),
            Some(Drained::Frame(Frame::Messages(vec!["a".into(), "b".into()])))
        );
        assert_eq!(session.try_drain(), None);
    }

    #[test]
    fn full_queue_rejects_instead_of_dropping() {
        let (session, _) = session_with(SessionKind::Polling, 2);
        session.send("1").unwrap();
        session.send("2").unwrap();
        let err = session.send("3").unwrap_err();
        assert_matches!(err, SessionError::QueueFull { capacity: 2, .. });
        assert_eq!(session.queued(), 2);
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (session, _) = session_with(SessionKind::Polling, 10);
        session.close(CloseStatus::NORMAL).await.unwrap();
        assert_matches!(session.send("late"), Err(SessionError::Closed(_)));
        assert_eq!(
            session.try_drain(),
            Some(Drained::Closed(CloseStatus::NORMAL))
        );
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (session, handler) = session_with(SessionKind::Streaming, 10);
        session.close(CloseStatus::GO_AWAY).await.unwrap();
        session.close(CloseStatus::NORMAL).await.unwrap();
        assert_eq!(session.close_status(), Some(CloseStatus::GO_AWAY));
        assert_eq!(handler.events(), vec!["close:3000"]);
    }

    #[tokio::test]
    async fn open_runs_once() {
        let (session, handler) = session_with(SessionKind::Polling, 10);
        assert!(session.open().await.unwrap());
        assert!(!session.open().await.unwrap());
        assert!(session.is_open());
        assert_eq!(handler.events(), vec!["open"]);
    }

    #[test]
    fn second_attach_is_refused() {
        let (session, _) = session_with(SessionKind::Streaming, 10);
        let guard = session.try_attach().unwrap();
        assert!(session.is_attached());
        assert_matches!(session.try_attach(), Err(SessionError::AlreadyAttached(_)));
        drop(guard);
        assert!(!session.is_attached());
        assert!(session.try_attach().is_ok());
    }

    #[tokio::test]
    async fn closed_session_cannot_attach() {
        let (session, _) = session_with(SessionKind::Polling, 10);
        session.close(CloseStatus::NORMAL).await.unwrap();
        assert_matches!(session.try_attach(), Err(SessionError::Closed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_clock() {
        let (session, _) = session_with(SessionKind::Polling, 10);
        tokio::time::advance(Duration::from_secs(3)).await;
        // NEW counts from creation
        assert_eq!(session.time_since_last_active(), Duration::from_secs(3));

        session.open().await.unwrap();
        let guard = session.try_attach().unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(session.time_since_last_active(), Duration::ZERO);

        drop(guard);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(session.time_since_last_active(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_needs_open_idle_session() {
        let (session, _) = session_with(SessionKind::Streaming, 10);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!session.heartbeat_if_idle(Duration::from_secs(25)));

        session.open().await.unwrap();
        assert!(!session.heartbeat_if_idle(Duration::from_secs(25)));
        tokio::time::advance(Duration::from_secs(26)).await;
        assert!(session.heartbeat_if_idle(Duration::from_secs(25)));
        // coalesced while pending
        assert!(!session.heartbeat_if_idle(Duration::from_secs(25)));
        assert_eq!(session.try_drain(), Some(Drained::Frame(Frame::Heartbeat)));
    }

    #[tokio::test(start_paused = true)]
    async fn messages_supersede_pending_heartbeat() {
        let (session, _) = session_with(SessionKind::Streaming, 10);
        session.open().await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(session.heartbeat_if_idle(Duration::from_secs(25)));
        session.send("m").unwrap();
        assert_eq!(
            session.try_drain(),
            Some(Drained::Frame(Frame::Messages(vec!["m".into()])))
        );
        assert_eq!(session.try_drain(), None);
    }

    #[tokio::test]
    async fn next_frame_waits_for_send() {
        let (session, _) = session_with(SessionKind::Streaming, 10);
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.next_frame().await })
        };
        tokio::task::yield_now().await;
        session.send("wake").unwrap();
        assert_eq!(
            waiter.await.unwrap(),
            Drained::Frame(Frame::Messages(vec!["wake".into()]))
        );
    }

    #[tokio::test]
    async fn next_frame_wakes_on_close() {
        let (session, _) = session_with(SessionKind::Streaming, 10);
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.next_frame().await })
        };
        tokio::task::yield_now().await;
        session.close(CloseStatus::GOING_AWAY).await.unwrap();
        assert_eq!(
            waiter.await.unwrap(),
            Drained::Closed(CloseStatus::GOING_AWAY)
        );
    }

    #[tokio::test]
    async fn inbound_messages_arrive_in_order() {
        let (session, handler) = session_with(SessionKind::Polling, 10);
        session.deliver_inbound(r#"["x","y"]"#).await.unwrap();
        session.deliver_inbound(r#""z""#).await.unwrap();
        assert_eq!(handler.messages(), vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn malformed_inbound_closes_with_bad_data() {
        let (session, handler) = session_with(SessionKind::Polling, 10);
        let err = session.deliver_inbound("[not json").await.unwrap_err();
        assert_eq!(err.session_id, *session.id());
        assert_eq!(session.close_status(), Some(CloseStatus::BAD_DATA));
        assert_eq!(handler.events(), vec!["error", "close:1007"]);
    }

    #[tokio::test]
    async fn inbound_after_close_is_refused() {
        let (session, handler) = session_with(SessionKind::Polling, 10);
        session.close(CloseStatus::NORMAL).await.unwrap();
        assert!(session.deliver_inbound(r#"["late"]"#).await.is_err());
        assert!(handler.messages().is_empty());
    }

    #[tokio::test]
    async fn failing_message_handler_closes_with_server_error() {
        let handler = Arc::new(RecordingHandler::failing_on("boom"));
        let session = Session::new(SessionInit {
            id: "s".into(),
            kind: SessionKind::Polling,
            handler: handler.clone(),
            attributes: Attributes::new(),
            principal: None,
            capacity: 10,
        });
        assert!(session.deliver_inbound(r#"["ok","boom","never"]"#).await.is_err());
        assert_eq!(handler.messages(), vec!["ok", "boom"]);
        assert_eq!(session.close_status(), Some(CloseStatus::SERVER_ERROR));
    }

    #[test]
    fn debug_shows_id_and_state() {
        let (session, _) = session_with(SessionKind::Raw, 1);
        let debug = format!("{session:?}");
        assert!(debug.contains("Raw"));
        assert!(debug.contains("New"));
    }
}
