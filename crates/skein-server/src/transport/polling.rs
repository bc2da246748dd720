//! `xhr` long polling.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use skein_core::TransportError;
use tracing::instrument;

use super::framing::{Framer, XhrFramer};
use super::sending::{Delivery, respond};
use super::{KindFactory, SessionFactory, TransportHandler, TransportKind};
use crate::session::{Session, SessionKind};

/// One frame per request; the client polls again right away.
pub struct PollingTransport {
    framer: Arc<dyn Framer>,
    factory: KindFactory,
}

impl PollingTransport {
    /// Create the handler; `capacity` bounds each session's queue.
    pub fn new(capacity: usize) -> Self {
        Self {
            framer: Arc::new(XhrFramer::polling()),
            factory: KindFactory {
                kind: SessionKind::Polling,
                capacity,
            },
        }
    }
}

#[async_trait]
impl TransportHandler for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Xhr
    }

    fn accepts(&self, session: &Session) -> bool {
        session.kind() == SessionKind::Polling
    }

    fn session_factory(&self) -> Option<&dyn SessionFactory> {
        Some(&self.factory)
    }

    #[instrument(skip_all, fields(session_id = %session.id()))]
    async fn handle(&self, request: Request<Body>, session: Arc<Session>) -> Result<Response, TransportError> {
        let (parts, _body) = request.into_parts();
        respond(session, &parts, self.framer.clone(), Delivery::Polling).await
    }
}
