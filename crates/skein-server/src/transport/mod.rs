//! Transport kinds and the per-transport handler contract.
//!
//! Every handler serves one [`TransportKind`]. What else it can do is
//! exposed as explicit capabilities the dispatcher queries:
//!
//! - [`SessionFactory`]: may create a session on first contact
//! - [`Upgrader`]: performs a websocket upgrade for the raw `/websocket` path
//!
//! HTTP transports write frames through a [`Framer`] of their own.

pub mod framing;
pub mod polling;
pub mod receiving;
pub mod sending;
pub mod streaming;
pub mod websocket;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use skein_core::{SessionId, TransportError};
use skein_hooks::Attributes;
use skein_settings::TransportSettings;

pub use framing::Framer;

use crate::handler::{MessageHandler, Principal};
use crate::session::{Session, SessionInit, SessionKind};

/// Supported transport kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Framed websocket.
    WebSocket,
    /// XHR long polling.
    Xhr,
    /// XHR streaming.
    XhrStreaming,
    /// Server-sent events.
    EventSource,
    /// Hidden iframe with script blocks.
    HtmlFile,
    /// XHR upload of client messages.
    XhrSend,
}

/// Static facts about one transport kind.
#[derive(Debug)]
pub struct TransportDescriptor {
    /// Kind described.
    pub kind: TransportKind,
    /// Name used in request paths.
    pub name: &'static str,
    /// Required HTTP method.
    pub method: Method,
    /// Whether cross-origin use (and preflight) is supported.
    pub cors: bool,
    /// Whether responses carry no-cache headers.
    pub no_cache: bool,
    /// Whether the transport upgrades the connection.
    pub upgrade: bool,
}

static DESCRIPTORS: [TransportDescriptor; 6] = [
    TransportDescriptor {
        kind: TransportKind::WebSocket,
        name: "websocket",
        method: Method::GET,
        cors: false,
        no_cache: false,
        upgrade: true,
    },
    TransportDescriptor {
        kind: TransportKind::Xhr,
        name: "xhr",
        method: Method::POST,
        cors: true,
        no_cache: true,
        upgrade: false,
    },
    TransportDescriptor {
        kind: TransportKind::XhrStreaming,
        name: "xhr_streaming",
        method: Method::POST,
        cors: true,
        no_cache: true,
        upgrade: false,
    },
    TransportDescriptor {
        kind: TransportKind::EventSource,
        name: "eventsource",
        method: Method::GET,
        cors: false,
        no_cache: true,
        upgrade: false,
    },
    TransportDescriptor {
        kind: TransportKind::HtmlFile,
        name: "htmlfile",
        method: Method::GET,
        cors: false,
        no_cache: true,
        upgrade: false,
    },
    TransportDescriptor {
        kind: TransportKind::XhrSend,
        name: "xhr_send",
        method: Method::POST,
        cors: true,
        no_cache: true,
        upgrade: false,
    },
];

impl TransportKind {
    /// Every kind, in descriptor order.
    pub const ALL: [Self; 6] = [
        Self::WebSocket,
        Self::Xhr,
        Self::XhrStreaming,
        Self::EventSource,
        Self::HtmlFile,
        Self::XhrSend,
    ];

    /// Resolve a path segment. Names are case-sensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        DESCRIPTORS.iter().find(|d| d.name == name).map(|d| d.kind)
    }

    /// Static descriptor.
    pub fn descriptor(self) -> &'static TransportDescriptor {
        let index = match self {
            Self::WebSocket => 0,
            Self::Xhr => 1,
            Self::XhrStreaming => 2,
            Self::EventSource => 3,
            Self::HtmlFile => 4,
            Self::XhrSend => 5,
        };
        &DESCRIPTORS[index]
    }

    /// Name used in request paths.
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Serves one transport kind for established or new sessions.
#[async_trait]
pub trait TransportHandler: Send + Sync {
    /// Kind served.
    fn kind(&self) -> TransportKind;

    /// Whether a session of this style may be served by this handler.
    fn accepts(&self, session: &Session) -> bool;

    /// Session factory capability.
    fn session_factory(&self) -> Option<&dyn SessionFactory> {
        None
    }

    /// Raw upgrade capability.
    fn upgrader(&self) -> Option<&dyn Upgrader> {
        None
    }

    /// Handle one request for `session`.
    ///
    /// Client mistakes come back as `Ok` responses with a 4xx status;
    /// `Err` means the session transport failed.
    async fn handle(&self, request: Request<Body>, session: Arc<Session>) -> Result<Response, TransportError>;

    /// Begin accepting traffic.
    fn start(&self) {}

    /// Stop accepting traffic and drop live connections.
    fn stop(&self) {}

    /// Whether the handler accepts traffic.
    fn is_running(&self) -> bool {
        true
    }
}

/// Creates sessions on first contact.
pub trait SessionFactory: Send + Sync {
    /// Build a NEW session for `id`.
    fn create_session(
        &self,
        id: SessionId,
        handler: Arc<dyn MessageHandler>,
        attributes: Attributes,
        principal: Option<Principal>,
    ) -> Arc<Session>;
}

/// Performs an unframed websocket upgrade outside any registry.
#[async_trait]
pub trait Upgrader: Send + Sync {
    /// Upgrade the connection and hand it to `handler`.
    async fn upgrade(
        &self,
        request: Request<Body>,
        handler: Arc<dyn MessageHandler>,
        attributes: Attributes,
        principal: Option<Principal>,
    ) -> Result<Response, TransportError>;
}

/// Session factory shared by the HTTP transports and the websocket one.
#[derive(Clone, Copy, Debug)]
pub(crate) struct KindFactory {
    pub(crate) kind: SessionKind,
    pub(crate) capacity: usize,
}

impl SessionFactory for KindFactory {
    fn create_session(
        &self,
        id: SessionId,
        handler: Arc<dyn MessageHandler>,
        attributes: Attributes,
        principal: Option<Principal>,
    ) -> Arc<Session> {
        Session::new(SessionInit {
            id,
            kind: self.kind,
            handler,
            attributes,
            principal,
            capacity: self.capacity,
        })
    }
}

/// The standard handler for every kind.
pub fn default_transports(
    settings: &TransportSettings,
) -> HashMap<TransportKind, Arc<dyn TransportHandler>> {
    let capacity = settings.http_message_cache_size;
    let limit = settings.stream_bytes_limit;
    let handlers: [Arc<dyn TransportHandler>; 6] = [
        Arc::new(websocket::WebSocketTransport::new(capacity)),
        Arc::new(polling::PollingTransport::new(capacity)),
        Arc::new(streaming::StreamingTransport::xhr(capacity, limit)),
        Arc::new(streaming::StreamingTransport::eventsource(capacity, limit)),
        Arc::new(streaming::StreamingTransport::htmlfile(capacity, limit)),
        Arc::new(receiving::XhrSendTransport::new()),
    ];
    handlers.into_iter().map(|h| (h.kind(), h)).collect()
}
