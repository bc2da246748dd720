//! Request path classification.

use std::sync::LazyLock;

use regex::Regex;
use skein_core::{ServerId, SessionId};

static IFRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/iframe[0-9\-.a-z_]*\.html$").expect("valid regex"));

/// What a mount-relative path asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// `/` or empty.
    Greeting,
    /// `/info`.
    Info,
    /// `/iframe*.html`.
    Iframe,
    /// `/websocket` without session framing.
    RawWebSocket,
    /// `/{server}/{session}/{transport}`.
    Session(SessionPath),
}

impl Route {
    /// Classify a mount-relative path. `None` means "not found".
    pub fn classify(sub_path: &str) -> Option<Self> {
        match sub_path {
            "" | "/" => Some(Self::Greeting),
            "/info" => Some(Self::Info),
            "/websocket" => Some(Self::RawWebSocket),
            p if IFRAME_RE.is_match(p) => Some(Self::Iframe),
            p => SessionPath::parse(p).map(Self::Session),
        }
    }
}

/// A validated session request path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPath {
    /// Client-chosen server id (load balancer hint, otherwise unused).
    pub server_id: ServerId,
    /// Session id.
    pub session_id: SessionId,
    /// Transport name, not yet resolved.
    pub transport: String,
}

impl SessionPath {
    /// Parse `/{server}/{session}/{transport}`.
    ///
    /// Rejects anything but exactly three non-empty segments, a `.` in the
    /// server or session id, and a `;` in the last segment (path
    /// parameters there enable reflected file download attacks).
    pub fn parse(sub_path: &str) -> Option<Self> {
        let rest = sub_path.strip_prefix('/')?;
        let mut segments = rest.split('/');
        let (server, session, transport) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() {
            return None;
        }
        if server.is_empty() || session.is_empty() || transport.is_empty() {
            return None;
        }
        if server.contains('.') || session.contains('.') || transport.contains(';') {
            return None;
        }
        Some(Self {
            server_id: ServerId::from(server),
            session_id: SessionId::from(session),
            transport: transport.to_owned(),
        })
    }
}
