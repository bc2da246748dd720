//! `xhr_send`: the client uploads a message batch.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use skein_core::{CloseStatus, TransportError};
use tracing::{debug, instrument};

use super::{TransportHandler, TransportKind};
use crate::session::Session;

/// Largest accepted upload.
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Receives client messages for an HTTP session. Never creates sessions.
#[derive(Clone, Copy, Debug, Default)]
pub struct XhrSendTransport;

impl XhrSendTransport {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportHandler for XhrSendTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::XhrSend
    }

    fn accepts(&self, session: &Session) -> bool {
        session.kind().is_http()
    }

    #[instrument(skip_all, fields(session_id = %session.id()))]
    async fn handle(&self, request: Request<Body>, session: Arc<Session>) -> Result<Response, TransportError> {
        let body = match axum::body::to_bytes(request.into_body(), MAX_PAYLOAD_BYTES).await {
            Ok(body) => body,
            Err(e) => {
                let err = TransportError::new(session.id().clone(), "failed to read message payload")
                    .with_source(e);
                return Err(session.fail(err, CloseStatus::SERVER_ERROR).await);
            }
        };
        if body.is_empty() {
            debug!("empty payload");
            return Ok((StatusCode::INTERNAL_SERVER_ERROR, "Payload expected.").into_response());
        }

        let payload = match std::str::from_utf8(&body) {
            Ok(payload) => payload,
            Err(e) => {
                let err = TransportError::new(session.id().clone(), "payload is not UTF-8")
                    .with_source(e);
                return Err(session.fail(err, CloseStatus::BAD_DATA).await);
            }
        };
        session.deliver_inbound(payload).await?;

        Ok((
            StatusCode::NO_CONTENT,
            [(CONTENT_TYPE, "text/plain; charset=UTF-8")],
        )
            .into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionKind;
    use crate::testing::session_with;

    fn send(body: &'static str) -> Request<Body> {
        Request::post("/echo/a/s1/xhr_send").body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn delivers_batch_and_answers_no_content() {
        let (session, handler) = session_with(SessionKind::Polling, 10);
        let response = XhrSendTransport
            .handle(send(r#"["a","b"]"#), session)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/plain; charset=UTF-8"
        );
        assert_eq!(handler.messages(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_body_expects_payload() {
        let (session, _) = session_with(SessionKind::Polling, 10);
        let response = XhrSendTransport.handle(send(""), session.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Payload expected.");
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn broken_json_closes_session() {
        let (session, handler) = session_with(SessionKind::Streaming, 10);
        let err = XhrSendTransport
            .handle(send("[\"unterminated"), session.clone())
            .await
            .unwrap_err();
        assert_eq!(err.session_id.as_str(), "s1");
        assert_eq!(session.close_status(), Some(CloseStatus::BAD_DATA));
        assert!(handler.messages().is_empty());
    }

    #[test]
    fn accepts_http_sessions_only() {
        assert!(XhrSendTransport.accepts(&session_with(SessionKind::Polling, 1).0));
        assert!(XhrSendTransport.accepts(&session_with(SessionKind::Streaming, 1).0));
        assert!(!XhrSendTransport.accepts(&session_with(SessionKind::WebSocket, 1).0));
        assert!(XhrSendTransport.session_factory().is_none());
    }
}
