//! Error hierarchy for the skein session layer.
//!
//! - [`CodecError`]: an inbound payload or frame could not be decoded
//! - [`SessionError`]: an operation was refused by a session's state
//! - [`TransportError`]: "session transport failed"; always names the
//!   session and forces it closed
//! - [`HandshakeError`]: "handshake failed"; raised while establishing or
//!   attaching to a session, before a transport owns the exchange

use thiserror::Error;

use crate::ids::SessionId;

/// Boxed error source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Malformed inbound data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The payload was not a JSON array of strings or a JSON string.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// A frame did not start with a known frame marker.
    #[error("unknown frame: {0}")]
    UnknownFrame(String),
}

/// Operation refused by a session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The session is closed; nothing more may be sent or delivered.
    #[error("session {0} is closed")]
    Closed(SessionId),
    /// The outbound queue reached its configured capacity.
    #[error("outbound queue for session {session_id} is full ({capacity} messages)")]
    QueueFull {
        /// Session whose queue overflowed.
        session_id: SessionId,
        /// Configured capacity.
        capacity: usize,
    },
    /// Another request already owns the session's response.
    #[error("session {0} is already attached to another request")]
    AlreadyAttached(SessionId),
}

/// Failure inside an established session's transport.
#[derive(Debug, Error)]
#[error("session transport failed for {session_id}: {message}")]
pub struct TransportError {
    /// Session whose transport failed.
    pub session_id: SessionId,
    /// Human-readable message.
    pub message: String,
    /// Original cause.
    #[source]
    pub source: Option<BoxError>,
}

impl TransportError {
    /// Create a new transport error.
    #[must_use]
    pub fn new(session_id: SessionId, message: impl Into<String>) -> Self {
        Self {
            session_id,
            message: message.into(),
            source: None,
        }
    }

    /// Set the error cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Failure while establishing a session or upgrading a connection.
#[derive(Debug, Error)]
#[error("handshake failed for {method} {uri}: {message}")]
pub struct HandshakeError {
    /// Request method.
    pub method: String,
    /// Request URI.
    pub uri: String,
    /// Human-readable message.
    pub message: String,
    /// Original cause.
    #[source]
    pub source: Option<BoxError>,
}

impl HandshakeError {
    /// Create a new handshake error.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        uri: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Set the error cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}
