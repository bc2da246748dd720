//! Core types shared by interceptors and the chain.

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};

/// Attributes collected during a handshake and handed to the new session.
pub type Attributes = HashMap<String, serde_json::Value>;

/// Read-only view of the request being handshaken.
#[derive(Clone, Debug)]
pub struct HandshakeRequest {
    /// Request method.
    pub method: Method,
    /// Full request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Session id parsed from the path (absent for raw websocket upgrades).
    pub session_id: Option<String>,
    /// Transport name parsed from the path.
    pub transport: Option<String>,
    /// Authenticated principal, if an upstream layer attached one.
    pub principal: Option<String>,
}

impl HandshakeRequest {
    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Response written by an interceptor that refuses a handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Veto {
    /// Status code to answer with.
    pub status: StatusCode,
    /// Extra response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: String,
}

impl Veto {
    /// A veto with an empty body.
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: String::new(),
        }
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a response header. Invalid values are dropped.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(v) = HeaderValue::from_str(value) {
            let _ = self.headers.insert(name, v);
        }
        self
    }
}

/// Decision returned by a before-handshake hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeDecision {
    /// Let the handshake continue.
    Proceed,
    /// Abort the handshake and answer with the veto.
    Reject(Veto),
}

impl HandshakeDecision {
    /// Whether the decision aborts the handshake.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Reject(_))
    }
}
