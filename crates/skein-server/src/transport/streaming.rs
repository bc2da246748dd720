//! Streaming HTTP transports: `xhr_streaming`, `eventsource`, `htmlfile`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use skein_core::TransportError;
use tracing::instrument;

use super::framing::{EventSourceFramer, Framer, HtmlFileFramer, XhrFramer};
use super::sending::{Delivery, respond};
use super::{KindFactory, SessionFactory, TransportHandler, TransportKind};
use crate::session::{Session, SessionKind};

/// Keeps the response open and flushes frames as they are queued, until
/// the stream byte limit forces the client to reconnect.
pub struct StreamingTransport {
    kind: TransportKind,
    framer: Arc<dyn Framer>,
    factory: KindFactory,
    limit: usize,
}

impl StreamingTransport {
    fn with_framer(kind: TransportKind, framer: Arc<dyn Framer>, capacity: usize, limit: usize) -> Self {
        Self {
            kind,
            framer,
            factory: KindFactory {
                kind: SessionKind::Streaming,
                capacity,
            },
            limit,
        }
    }

    /// `xhr_streaming`.
    pub fn xhr(capacity: usize, limit: usize) -> Self {
        Self::with_framer(
            TransportKind::XhrStreaming,
            Arc::new(XhrFramer::streaming()),
            capacity,
            limit,
        )
    }

    /// `eventsource`.
    pub fn eventsource(capacity: usize, limit: usize) -> Self {
        Self::with_framer(TransportKind::EventSource, Arc::new(EventSourceFramer), capacity, limit)
    }

    /// `htmlfile`.
    pub fn htmlfile(capacity: usize, limit: usize) -> Self {
        Self::with_framer(TransportKind::HtmlFile, Arc::new(HtmlFileFramer), capacity, limit)
    }
}

#[async_trait]
impl TransportHandler for StreamingTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn accepts(&self, session: &Session) -> bool {
        session.kind() == SessionKind::Streaming
    }

    fn session_factory(&self) -> Option<&dyn SessionFactory> {
        Some(&self.factory)
    }

    #[instrument(skip_all, fields(transport = %self.kind, session_id = %session.id()))]
    async fn handle(&self, request: Request<Body>, session: Arc<Session>) -> Result<Response, TransportError> {
        let (parts, _body) = request.into_parts();
        respond(
            session,
            &parts,
            self.framer.clone(),
            Delivery::Streaming { limit: self.limit },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::session_with;
    use axum::http::StatusCode;
    use axum::http::header::CONTENT_TYPE;

    #[test]
    fn constructors_set_kind() {
        assert_eq!(StreamingTransport::xhr(1, 1).kind(), TransportKind::XhrStreaming);
        assert_eq!(
            StreamingTransport::eventsource(1, 1).kind(),
            TransportKind::EventSource
        );
        assert_eq!(StreamingTransport::htmlfile(1, 1).kind(), TransportKind::HtmlFile);
    }

    #[test]
    fn accepts_only_streaming_sessions() {
        let transport = StreamingTransport::eventsource(10, 100);
        assert!(transport.accepts(&session_with(SessionKind::Streaming, 1).0));
        assert!(!transport.accepts(&session_with(SessionKind::Polling, 1).0));
    }

    #[tokio::test]
    async fn htmlfile_without_callback_is_server_error() {
        let transport = StreamingTransport::htmlfile(10, 4096);
        let (session, _) = session_with(SessionKind::Streaming, 10);
        let request = Request::get("/echo/a/s1/htmlfile").body(Body::empty()).unwrap();
        let response = transport.handle(request, session.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"\"callback\" parameter required");
        // nothing was written, so the session never opened
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn eventsource_sets_content_type_and_opens() {
        let transport = StreamingTransport::eventsource(10, 4096);
        let (session, _) = session_with(SessionKind::Streaming, 10);
        let request = Request::get("/echo/a/s1/eventsource").body(Body::empty()).unwrap();
        let response = transport.handle(request, session.clone()).await.unwrap();
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/event-stream; charset=UTF-8"
        );
        assert!(session.is_open());
        assert!(session.is_attached());
        drop(response);
        assert!(!session.is_attached());
    }
}
